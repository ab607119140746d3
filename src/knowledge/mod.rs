//! Knowledge retrieval
//!
//! Similarity search over short IAM knowledge snippets (one per user,
//! application and role) used by the semantic tier and for extraction hints.

pub mod embedder;
pub mod ingest;
pub mod vector_store;

pub use embedder::{Embedder, HashingEmbedder, HttpEmbedder};
pub use ingest::ingest_iam_store;
pub use vector_store::{Document, InMemoryKnowledgeStore};

use async_trait::async_trait;
use std::collections::HashMap;

/// A retrieved knowledge snippet.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub score: f32,
}

/// Equality filter over entry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    Eq { key: String, value: String },
    And(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        MetadataFilter::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Build a filter from optional pairs, dropping the unset ones.
    ///
    /// Returns `None` when nothing is set, a bare `Eq` for one pair and an
    /// `And` otherwise.
    pub fn from_pairs<'a, I>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut conditions: Vec<MetadataFilter> = pairs
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| MetadataFilter::eq(key, v)))
            .collect();
        match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(MetadataFilter::And(conditions)),
        }
    }

    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        match self {
            MetadataFilter::Eq { key, value } => metadata.get(key) == Some(value),
            MetadataFilter::And(conditions) => conditions.iter().all(|c| c.matches(metadata)),
        }
    }
}

/// Knowledge retrieval collaborator.
///
/// Backend failures degrade to an empty result rather than an error.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        score_threshold: Option<f32>,
    ) -> Vec<KnowledgeEntry>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_filter_from_pairs_skips_unset() {
        assert_eq!(MetadataFilter::from_pairs([("AppName", None), ("RoleName", None)]), None);
        assert_eq!(
            MetadataFilter::from_pairs([("AppName", Some("Workday")), ("RoleName", None)]),
            Some(MetadataFilter::eq("AppName", "Workday"))
        );
    }

    #[test]
    fn test_and_filter_requires_every_condition() {
        let filter = MetadataFilter::from_pairs([("AppName", Some("Workday")), ("RoleName", Some("HR Analyst"))])
            .unwrap();
        assert!(filter.matches(&metadata(&[("AppName", "Workday"), ("RoleName", "HR Analyst")])));
        assert!(!filter.matches(&metadata(&[("AppName", "Workday")])));
        assert!(!filter.matches(&metadata(&[("AppName", "SAP"), ("RoleName", "HR Analyst")])));
    }
}
