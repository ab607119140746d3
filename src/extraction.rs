//! Entity Extraction
//!
//! Classifies a raw access request into user, application and role candidates.
//! The three classifications run as independent tasks joined under one
//! timeout; a single task going wrong never fails the whole extraction.

use crate::config::EntityKind;
use crate::error::{Result, ValidatorError};
use crate::knowledge::{KnowledgeRetriever, MetadataFilter};
use crate::llm::{strip_code_fences, CompletionBackend};
use itertools::Itertools;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one classification task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Found(String),
    Empty,
    Malformed(String),
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedEntities {
    pub user_name: Option<String>,
    pub application_name: Option<String>,
    pub role_name: Option<String>,
}

impl ExtractedEntities {
    pub fn get(&self, kind: EntityKind) -> Option<&str> {
        match kind {
            EntityKind::User => self.user_name.as_deref(),
            EntityKind::Application => self.application_name.as_deref(),
            EntityKind::Role => self.role_name.as_deref(),
        }
    }

    fn set(&mut self, kind: EntityKind, value: String) {
        match kind {
            EntityKind::User => self.user_name = Some(value),
            EntityKind::Application => self.application_name = Some(value),
            EntityKind::Role => self.role_name = Some(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

pub struct EntityExtractor {
    backend: Arc<dyn CompletionBackend>,
    retriever: Arc<dyn KnowledgeRetriever>,
    timeout: Duration,
    hint_k: usize,
}

impl EntityExtractor {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        retriever: Arc<dyn KnowledgeRetriever>,
        timeout: Duration,
        hint_k: usize,
    ) -> Self {
        Self {
            backend,
            retriever,
            timeout,
            hint_k,
        }
    }

    pub async fn extract(&self, raw_request: &str) -> Result<ExtractedEntities> {
        if raw_request.trim().is_empty() {
            return Err(ValidatorError::Extraction("No request provided".to_string()));
        }

        let handles: Vec<(EntityKind, JoinHandle<TaskOutcome>)> = EntityKind::ALL
            .iter()
            .map(|kind| {
                let kind = *kind;
                let backend = Arc::clone(&self.backend);
                let retriever = Arc::clone(&self.retriever);
                let request = raw_request.to_string();
                let hint_k = self.hint_k;
                let handle =
                    tokio::spawn(async move { classify(kind, backend, retriever, request, hint_k).await });
                (kind, handle)
            })
            .collect();

        // Dropping the handles on timeout detaches the tasks; they are not aborted.
        let joined = tokio::time::timeout(self.timeout, async move {
            let mut outcomes = Vec::with_capacity(handles.len());
            for (kind, handle) in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => TaskOutcome::Failed(format!("{} extraction failed: {}", kind, e)),
                };
                outcomes.push((kind, outcome));
            }
            outcomes
        })
        .await;

        let outcomes = match joined {
            Ok(outcomes) => outcomes,
            Err(_) => {
                warn!("Entity extraction timed out after {:?}", self.timeout);
                return Err(ValidatorError::ExtractionTimeout);
            }
        };

        let entities = merge_outcomes(outcomes)?;
        info!(
            "Extracted entities: user={:?}, application={:?}, role={:?}",
            entities.user_name, entities.application_name, entities.role_name
        );
        Ok(entities)
    }
}

/// At least one `Found` wins; otherwise every sub-error is reported.
pub fn merge_outcomes(outcomes: Vec<(EntityKind, TaskOutcome)>) -> Result<ExtractedEntities> {
    let mut entities = ExtractedEntities::default();
    let mut problems = Vec::new();

    for (kind, outcome) in outcomes {
        match outcome {
            TaskOutcome::Found(name) => entities.set(kind, name),
            TaskOutcome::Empty => problems.push(format!("{} not mentioned in request", kind)),
            TaskOutcome::Malformed(reason) | TaskOutcome::Failed(reason) => {
                debug!("{} extraction produced no value: {}", kind, reason);
                problems.push(reason);
            }
        }
    }

    if entities.is_empty() {
        return Err(ValidatorError::Extraction(problems.join("; ")));
    }
    Ok(entities)
}

/// Parse a one-key JSON reply such as `{"role_name": "HR Analyst"}`.
pub fn parse_classification(kind: EntityKind, response: &str) -> TaskOutcome {
    let cleaned = strip_code_fences(response).trim();
    let value: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(e) => return TaskOutcome::Malformed(format!("{} extraction failed: {}", kind, e)),
    };

    let object = match value.as_object() {
        Some(object) if object.len() == 1 => object,
        _ => {
            return TaskOutcome::Malformed(format!(
                "{} extraction failed: expected a JSON object with the single key '{}'",
                kind,
                kind.field_name()
            ))
        }
    };

    match object.get(kind.field_name()) {
        Some(Value::Null) => TaskOutcome::Empty,
        Some(Value::String(name)) if name.trim().is_empty() => TaskOutcome::Empty,
        Some(Value::String(name)) => TaskOutcome::Found(name.trim().to_string()),
        Some(other) => TaskOutcome::Malformed(format!(
            "{} extraction failed: '{}' is not a string: {}",
            kind,
            kind.field_name(),
            other
        )),
        None => TaskOutcome::Malformed(format!(
            "{} extraction failed: missing key '{}'",
            kind,
            kind.field_name()
        )),
    }
}

async fn classify(
    kind: EntityKind,
    backend: Arc<dyn CompletionBackend>,
    retriever: Arc<dyn KnowledgeRetriever>,
    request: String,
    hint_k: usize,
) -> TaskOutcome {
    let hints = known_names(retriever.as_ref(), kind, &request, hint_k).await;
    let prompt = extraction_prompt(kind, &hints, &request);
    match backend.complete(&prompt).await {
        Ok(response) => parse_classification(kind, &response),
        Err(e) => TaskOutcome::Failed(format!("{} extraction failed: {}", kind, e)),
    }
}

/// Names of known entities of `kind` close to the request, for the prompt only.
async fn known_names(retriever: &dyn KnowledgeRetriever, kind: EntityKind, request: &str, k: usize) -> Vec<String> {
    let filter = MetadataFilter::eq("EntityType", kind.entity_type());
    retriever
        .search(request, k, Some(&filter), None)
        .await
        .into_iter()
        .filter_map(|entry| entry.metadata.get(kind.metadata_name_key()).cloned())
        .unique()
        .collect()
}

fn extraction_prompt(kind: EntityKind, hints: &[String], request: &str) -> String {
    let known = if hints.is_empty() {
        format!("No {}s found", kind)
    } else {
        hints.join(", ")
    };
    let (description, example) = match kind {
        EntityKind::User => ("the name of the user who needs access", "Aaron.Nichols"),
        EntityKind::Application => ("the application the access is requested in", "Salesforce"),
        EntityKind::Role => ("the role being requested", "Payroll Admin"),
    };

    format!(
        r#"Extract {description} from the access request below.

Known {kind}s in system: {known}

Rules:
- Return ONLY a JSON object with the single key "{field}"
- Use null if the request does not mention one
- Copy the name as written, do not invent names
- No markdown, no explanation

Example: {{"{field}": "{example}"}}

Request: {request}"#,
        description = description,
        kind = kind,
        known = known,
        field = kind.field_name(),
        example = example,
        request = request,
    )
}
