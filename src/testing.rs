//! Test doubles shared by unit tests.

use crate::error::Result;
use crate::knowledge::{KnowledgeEntry, KnowledgeRetriever, MetadataFilter};
use crate::llm::CompletionBackend;
use async_trait::async_trait;

/// Backend that always answers with the same text.
pub struct FixedBackend(pub &'static str);

#[async_trait]
impl CompletionBackend for FixedBackend {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// Backend driven by a closure over the prompt.
pub struct FnBackend<F>(pub F);

#[async_trait]
impl<F> CompletionBackend for FnBackend<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    async fn complete(&self, prompt: &str) -> Result<String> {
        (self.0)(prompt)
    }
}

/// Retriever with nothing indexed.
pub struct EmptyRetriever;

#[async_trait]
impl KnowledgeRetriever for EmptyRetriever {
    async fn search(
        &self,
        _query: &str,
        _k: usize,
        _filter: Option<&MetadataFilter>,
        _score_threshold: Option<f32>,
    ) -> Vec<KnowledgeEntry> {
        Vec::new()
    }
}

/// Backend that turns a lookup instruction into the SQL a well-behaved
/// generator would write.
pub struct SqlWriterBackend;

#[async_trait]
impl CompletionBackend for SqlWriterBackend {
    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(sql_for_instruction(prompt))
    }
}

pub fn sql_for_instruction(prompt: &str) -> String {
    let pattern = regex::Regex::new(
        r"selects (\w+) from (\w+) where (\w+) equals '((?:[^']|'')*)'(?: and (\w+) equals '((?:[^']|'')*)')?",
    )
    .unwrap();
    let caps = match pattern.captures(prompt) {
        Some(caps) => caps,
        None => return "I cannot help with that".to_string(),
    };
    let mut sql = format!(
        r#"SELECT "{}" FROM "{}" WHERE "{}" = '{}'"#,
        &caps[1], &caps[2], &caps[3], &caps[4]
    );
    if let (Some(column), Some(value)) = (caps.get(5), caps.get(6)) {
        sql.push_str(&format!(r#" AND "{}" = '{}'"#, column.as_str(), value.as_str()));
    }
    sql.push_str(" LIMIT 1");
    sql
}
