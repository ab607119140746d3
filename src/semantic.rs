//! Semantic (retrieval) tier
//!
//! Answers from retrieved IAM knowledge snippets. The classifier must reply
//! with one `VALID:` or `INVALID:` line; anything else is an abstention.

use crate::config::EntityKind;
use crate::error::ValidatorError;
use crate::extraction::ExtractedEntities;
use crate::knowledge::{KnowledgeEntry, KnowledgeRetriever, MetadataFilter};
use crate::llm::{strip_code_fences, CompletionBackend};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SemanticVerdict {
    /// The full `VALID: ...` line.
    Valid(String),
    /// The full `INVALID: ...` line.
    Invalid(String),
    Inconclusive,
    /// The tier itself broke (recorded at the stage boundary).
    Error(String),
    Skipped,
}

impl SemanticVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, SemanticVerdict::Valid(_))
    }
}

impl fmt::Display for SemanticVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticVerdict::Valid(line) | SemanticVerdict::Invalid(line) => f.write_str(line),
            SemanticVerdict::Inconclusive => f.write_str("INCONCLUSIVE"),
            SemanticVerdict::Error(reason) => write!(f, "ERROR: {}", reason),
            SemanticVerdict::Skipped => f.write_str("SKIPPED"),
        }
    }
}

pub struct SemanticValidator {
    backend: Arc<dyn CompletionBackend>,
    retriever: Arc<dyn KnowledgeRetriever>,
    score_threshold: f32,
}

impl SemanticValidator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        retriever: Arc<dyn KnowledgeRetriever>,
        score_threshold: f32,
    ) -> Self {
        Self {
            backend,
            retriever,
            score_threshold,
        }
    }

    pub async fn validate(&self, raw_request: &str, k: usize, filter: Option<&MetadataFilter>) -> SemanticVerdict {
        let entries = self.retrieve(raw_request, k, filter).await;
        if entries.is_empty() {
            debug!("{}", ValidatorError::SemanticAbstain("no knowledge entries retrieved".to_string()));
            return SemanticVerdict::Inconclusive;
        }

        let prompt = validation_prompt(raw_request, &entries);
        let response = match self.backend.complete(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                debug!("{}", ValidatorError::SemanticAbstain(e.to_string()));
                return SemanticVerdict::Inconclusive;
            }
        };

        match parse_verdict(&response) {
            Ok(verdict) => {
                info!("Semantic verdict: {}", verdict);
                verdict
            }
            Err(abstain) => {
                debug!("{}", abstain);
                SemanticVerdict::Inconclusive
            }
        }
    }

    /// Thresholded search first, then one unthresholded retry.
    pub async fn retrieve(&self, query: &str, k: usize, filter: Option<&MetadataFilter>) -> Vec<KnowledgeEntry> {
        let entries = self
            .retriever
            .search(query, k, filter, Some(self.score_threshold))
            .await;
        if !entries.is_empty() {
            return entries;
        }
        debug!(
            "No knowledge entries above {:.2}, retrying without threshold",
            self.score_threshold
        );
        self.retriever.search(query, k, filter, None).await
    }
}

/// Equality filter over the names extraction found, if any.
pub fn entity_filter(entities: &ExtractedEntities) -> Option<MetadataFilter> {
    MetadataFilter::from_pairs(
        [EntityKind::Application, EntityKind::Role, EntityKind::User]
            .into_iter()
            .map(|kind| (kind.metadata_name_key(), entities.get(kind))),
    )
}

/// Only the first non-empty line counts.
pub fn parse_verdict(response: &str) -> Result<SemanticVerdict, ValidatorError> {
    let line = strip_code_fences(response)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    if line.starts_with("VALID:") {
        Ok(SemanticVerdict::Valid(line.to_string()))
    } else if line.starts_with("INVALID:") {
        Ok(SemanticVerdict::Invalid(line.to_string()))
    } else {
        Err(ValidatorError::SemanticAbstain(format!("unparseable classifier reply: {:?}", line)))
    }
}

fn validation_prompt(raw_request: &str, entries: &[KnowledgeEntry]) -> String {
    let context = entries
        .iter()
        .map(|entry| entry.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an IAM access validation assistant.

User request:
{request}

IAM metadata:
{context}

Rules:
- Respond ONLY with VALID: <reason> or INVALID: <reason>
- One sentence only
- No extra text"#,
        request = raw_request,
        context = context,
    )
}
