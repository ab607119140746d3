use crate::config::EntityKind;
use crate::deterministic::DeterministicVerdict;
use crate::extraction::ExtractedEntities;
use crate::semantic::SemanticVerdict;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Init,
    Extract,
    SemanticValidate,
    DeterministicValidate,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "Init",
            Stage::Extract => "Extract",
            Stage::SemanticValidate => "SemanticValidate",
            Stage::DeterministicValidate => "DeterministicValidate",
            Stage::Finalize => "Finalize",
        };
        f.write_str(name)
    }
}

/// Request-scoped record threaded through the pipeline stages.
///
/// Extracted names are written once, `error` keeps the first fatal condition,
/// and the verdict fields are written only by the finalize stage.
#[derive(Debug, Clone, Serialize)]
pub struct RequestState {
    request_id: Uuid,
    received_at: DateTime<Utc>,
    raw_request: String,
    user_name: Option<String>,
    application_name: Option<String>,
    role_name: Option<String>,
    semantic_verdict: Option<SemanticVerdict>,
    deterministic_verdict: Option<DeterministicVerdict>,
    error: Option<String>,
    is_valid: Option<bool>,
    final_response: Option<String>,
    processing_steps: Vec<Stage>,
}

impl RequestState {
    pub fn new(raw_request: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            received_at: Utc::now(),
            raw_request: raw_request.into(),
            user_name: None,
            application_name: None,
            role_name: None,
            semantic_verdict: None,
            deterministic_verdict: None,
            error: None,
            is_valid: None,
            final_response: None,
            processing_steps: Vec::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn raw_request(&self) -> &str {
        &self.raw_request
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    pub fn role_name(&self) -> Option<&str> {
        self.role_name.as_deref()
    }

    pub fn name(&self, kind: EntityKind) -> Option<&str> {
        match kind {
            EntityKind::User => self.user_name(),
            EntityKind::Application => self.application_name(),
            EntityKind::Role => self.role_name(),
        }
    }

    pub fn entities(&self) -> ExtractedEntities {
        ExtractedEntities {
            user_name: self.user_name.clone(),
            application_name: self.application_name.clone(),
            role_name: self.role_name.clone(),
        }
    }

    pub fn semantic_verdict(&self) -> Option<&SemanticVerdict> {
        self.semantic_verdict.as_ref()
    }

    pub fn deterministic_verdict(&self) -> Option<&DeterministicVerdict> {
        self.deterministic_verdict.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_valid(&self) -> Option<bool> {
        self.is_valid
    }

    pub fn final_response(&self) -> Option<&str> {
        self.final_response.as_deref()
    }

    pub fn processing_steps(&self) -> &[Stage] {
        &self.processing_steps
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        self.processing_steps.push(stage);
    }

    /// Fill names that are still unset; existing values are never replaced.
    pub(crate) fn set_entities(&mut self, entities: ExtractedEntities) {
        if self.user_name.is_none() {
            self.user_name = entities.user_name;
        }
        if self.application_name.is_none() {
            self.application_name = entities.application_name;
        }
        if self.role_name.is_none() {
            self.role_name = entities.role_name;
        }
    }

    /// Keeps the first error only.
    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }

    pub(crate) fn set_semantic_verdict(&mut self, verdict: SemanticVerdict) {
        self.semantic_verdict = Some(verdict);
    }

    pub(crate) fn set_deterministic_verdict(&mut self, verdict: DeterministicVerdict) {
        self.deterministic_verdict = Some(verdict);
    }

    pub(crate) fn finish(&mut self, is_valid: bool, response: String) {
        self.is_valid = Some(is_valid);
        self.final_response = Some(response);
    }
}
