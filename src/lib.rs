pub mod config;
pub mod db;
pub mod deterministic;
pub mod entity_lookup;
pub mod error;
pub mod extraction;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod query_gate;
pub mod semantic;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ValidatorConfig;
pub use error::{Result, ValidatorError};
pub use pipeline::{RequestState, Stage, ValidationPipeline};
