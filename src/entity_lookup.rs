//! Entity lookup
//!
//! Runs a gate-approved query against the IAM store. No inspection happens
//! here: the [`ValidatedQuery`] type is the proof of safety.

use crate::db::IamStore;
use crate::error::{Result, ValidatorError};
use crate::query_gate::ValidatedQuery;
use std::sync::Arc;
use tracing::debug;

pub struct EntityLookupService {
    store: Arc<dyn IamStore>,
}

impl EntityLookupService {
    pub fn new(store: Arc<dyn IamStore>) -> Self {
        Self { store }
    }

    /// Raw tabular text on success, `LookupFailure` with the backend's text otherwise.
    pub async fn run(&self, query: &ValidatedQuery) -> Result<String> {
        let result = self
            .store
            .run_read_query(query.sql())
            .await
            .map_err(|e| ValidatorError::LookupFailure(e.to_string()))?;
        debug!("Lookup on '{}' returned: {}", query.table(), result);
        Ok(result)
    }
}
