//! In-memory knowledge store
//!
//! Linear cosine-similarity search over embedded snippets. Small enough for
//! an IAM catalogue; no index structure.

use crate::error::{Result, ValidatorError};
use crate::knowledge::embedder::{Embedder, Embedding};
use crate::knowledge::{KnowledgeEntry, KnowledgeRetriever, MetadataFilter};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Document in the knowledge store
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub embedding: Embedding,
}

pub struct InMemoryKnowledgeStore {
    embedder: Arc<dyn Embedder>,
    documents: RwLock<Vec<Document>>,
}

impl InMemoryKnowledgeStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            documents: RwLock::new(Vec::new()),
        }
    }

    /// Embed and store a snippet. Re-adding an id replaces the old document.
    pub async fn add_document(
        &self,
        id: impl Into<String>,
        text: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let id = id.into();
        let text = text.into();
        let embedding = self.embedder.embed(&text).await?;

        let mut documents = self
            .documents
            .write()
            .map_err(|_| ValidatorError::Store("knowledge store lock poisoned".to_string()))?;
        documents.retain(|d| d.id != id);
        documents.push(Document {
            id,
            text,
            metadata,
            embedding,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rank(
        &self,
        query_embedding: &Embedding,
        k: usize,
        filter: Option<&MetadataFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<KnowledgeEntry>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| ValidatorError::Store("knowledge store lock poisoned".to_string()))?;

        let mut results: Vec<KnowledgeEntry> = documents
            .iter()
            .filter(|doc| filter.map_or(true, |f| f.matches(&doc.metadata)))
            .map(|doc| KnowledgeEntry {
                content: doc.text.clone(),
                metadata: doc.metadata.clone(),
                score: cosine_similarity(query_embedding, &doc.embedding),
            })
            .filter(|entry| score_threshold.map_or(true, |t| entry.score >= t))
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        Ok(results)
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledgeStore {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        score_threshold: Option<f32>,
    ) -> Vec<KnowledgeEntry> {
        let query_embedding = match self.embedder.embed(query).await {
            Ok(e) => e,
            Err(e) => {
                warn!("Knowledge search degraded to empty result: {}", e);
                return Vec::new();
            }
        };

        match self.rank(&query_embedding, k, filter, score_threshold) {
            Ok(results) => {
                debug!("Knowledge search returned {} entries", results.len());
                results
            }
            Err(e) => {
                warn!("Knowledge search degraded to empty result: {}", e);
                Vec::new()
            }
        }
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
