use thiserror::Error;

use crate::query_gate::QueryValidationError;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("{0}")]
    Extraction(String),

    #[error("Entity extraction timeout - LLM response took too long")]
    ExtractionTimeout,

    #[error("Semantic tier abstained: {0}")]
    SemanticAbstain(String),

    #[error("Query generation error: {0}")]
    QueryGeneration(String),

    #[error("Query validation error: {0}")]
    QueryValidation(#[from] QueryValidationError),

    #[error("Lookup failure: {0}")]
    LookupFailure(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    RelationshipInvalid(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ValidatorError>;
