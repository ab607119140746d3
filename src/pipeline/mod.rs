//! Validation Pipeline
//!
//! Drives one request through `Init → Extract → SemanticValidate →
//! (DeterministicValidate) → Finalize`. Nothing escapes `submit`: every
//! failure ends up in the request state and, from there, in a single
//! `INVALID: ...` line.

pub mod state;

pub use state::{RequestState, Stage};

use crate::config::ValidatorConfig;
use crate::db::IamStore;
use crate::deterministic::{DeterministicValidator, DeterministicVerdict};
use crate::entity_lookup::EntityLookupService;
use crate::extraction::EntityExtractor;
use crate::knowledge::KnowledgeRetriever;
use crate::llm::CompletionBackend;
use crate::query_gate::QuerySafetyGate;
use crate::semantic::{entity_filter, SemanticValidator, SemanticVerdict};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

pub struct ValidationPipeline {
    extractor: Arc<EntityExtractor>,
    semantic: Arc<SemanticValidator>,
    deterministic: Arc<DeterministicValidator>,
    k: usize,
}

impl ValidationPipeline {
    pub fn new(
        extractor: EntityExtractor,
        semantic: SemanticValidator,
        deterministic: DeterministicValidator,
        k: usize,
    ) -> Self {
        Self {
            extractor: Arc::new(extractor),
            semantic: Arc::new(semantic),
            deterministic: Arc::new(deterministic),
            k,
        }
    }

    /// Wire every stage from configuration and the three collaborators.
    pub fn from_config(
        config: &ValidatorConfig,
        backend: Arc<dyn CompletionBackend>,
        retriever: Arc<dyn KnowledgeRetriever>,
        store: Arc<dyn IamStore>,
    ) -> Self {
        let extractor = EntityExtractor::new(
            Arc::clone(&backend),
            Arc::clone(&retriever),
            config.extraction.timeout(),
            config.retrieval.hint_k,
        );
        let semantic = SemanticValidator::new(Arc::clone(&backend), retriever, config.retrieval.score_threshold);
        let gate = Arc::new(QuerySafetyGate::new(
            backend,
            config.entities.clone(),
            config.relationship.clone(),
        ));
        let lookup = Arc::new(EntityLookupService::new(store));
        let deterministic =
            DeterministicValidator::new(gate, lookup, config.entities.clone(), config.relationship.clone());
        Self::new(extractor, semantic, deterministic, config.retrieval.k)
    }

    /// Validate one request and return its final response line.
    pub async fn submit(&self, raw_request: &str) -> String {
        let state = self.run(raw_request).await;
        state
            .final_response()
            .map(str::to_string)
            .unwrap_or_else(|| "INVALID: Validation failed".to_string())
    }

    /// Validate one request and return the full state record.
    pub async fn run(&self, raw_request: &str) -> RequestState {
        let mut state = RequestState::new(raw_request);
        info!("[{}] Validating request: {}", state.request_id(), raw_request);

        self.init(&mut state);
        self.extract(&mut state).await;
        self.semantic_validate(&mut state).await;
        if !state.semantic_verdict().map_or(false, SemanticVerdict::is_valid) {
            self.deterministic_validate(&mut state).await;
        }
        self.finalize(&mut state);

        info!(
            "[{}] {} (steps: {})",
            state.request_id(),
            state.final_response().unwrap_or_default(),
            state.processing_steps().iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" → ")
        );
        state
    }

    fn init(&self, state: &mut RequestState) {
        state.enter(Stage::Init);
    }

    async fn extract(&self, state: &mut RequestState) {
        state.enter(Stage::Extract);
        match self.extractor.extract(state.raw_request()).await {
            Ok(entities) => state.set_entities(entities),
            Err(e) => {
                warn!("[{}] Extraction failed: {}", state.request_id(), e);
                state.record_error(e.to_string());
            }
        }
    }

    async fn semantic_validate(&self, state: &mut RequestState) {
        state.enter(Stage::SemanticValidate);
        if state.error().is_some() {
            state.set_semantic_verdict(SemanticVerdict::Skipped);
            return;
        }

        let semantic = Arc::clone(&self.semantic);
        let request = state.raw_request().to_string();
        let filter = entity_filter(&state.entities());
        let k = self.k;
        let handle = tokio::spawn(async move { semantic.validate(&request, k, filter.as_ref()).await });

        let verdict = match handle.await {
            Ok(verdict) => verdict,
            Err(e) => {
                let reason = panic_message(e);
                warn!("[{}] Semantic tier crashed: {}", state.request_id(), reason);
                SemanticVerdict::Error(reason)
            }
        };
        debug!("[{}] Semantic verdict: {}", state.request_id(), verdict);
        state.set_semantic_verdict(verdict);
    }

    async fn deterministic_validate(&self, state: &mut RequestState) {
        state.enter(Stage::DeterministicValidate);
        if let Some(error) = state.error() {
            let verdict = DeterministicVerdict::Failed(vec![error.to_string()]);
            state.set_deterministic_verdict(verdict);
            return;
        }

        let deterministic = Arc::clone(&self.deterministic);
        let snapshot = state.clone();
        let handle = tokio::spawn(async move { deterministic.validate(&snapshot).await });

        let verdict = match handle.await {
            Ok(verdict) => verdict,
            Err(e) => {
                let reason = panic_message(e);
                warn!("[{}] Deterministic tier crashed: {}", state.request_id(), reason);
                DeterministicVerdict::Failed(vec![reason])
            }
        };
        state.set_deterministic_verdict(verdict);
    }

    fn finalize(&self, state: &mut RequestState) {
        state.enter(Stage::Finalize);

        let (is_valid, response) = if let Some(error) = state.error() {
            (false, format!("INVALID: {}", single_line(error)))
        } else if let Some(SemanticVerdict::Valid(line)) = state.semantic_verdict() {
            (true, line.clone())
        } else if let Some(DeterministicVerdict::Passed) = state.deterministic_verdict() {
            (
                true,
                format!(
                    "VALID: {} can request {} in {}",
                    state.user_name().unwrap_or("User"),
                    state.role_name().unwrap_or("role"),
                    state.application_name().unwrap_or("application")
                ),
            )
        } else {
            let reason = state
                .deterministic_verdict()
                .and_then(DeterministicVerdict::first_reason)
                .unwrap_or("Validation failed");
            (false, format!("INVALID: {}", single_line(reason)))
        };

        state.finish(is_valid, response);
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return format!("task failed: {}", error);
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic".to_string()
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
