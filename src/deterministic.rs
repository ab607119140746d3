//! Deterministic (lookup) tier
//!
//! Confirms each extracted entity exists in the IAM store, then that the role
//! belongs to the requested application. Every lookup goes through the query
//! safety gate before it reaches the store.

use crate::config::{EntityDescriptor, EntityDescriptors, EntityKind, RelationshipDescriptor};
use crate::entity_lookup::EntityLookupService;
use crate::error::{Result, ValidatorError};
use crate::pipeline::RequestState;
use crate::query_gate::QuerySafetyGate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Case-insensitive substrings that mark a lookup result as a backend failure.
pub const ERROR_MARKERS: [&str; 7] = [
    "error",
    "unable to execute",
    "exception",
    "invalid",
    "failed",
    "does not exist",
    "sqlstate",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeterministicVerdict {
    Passed,
    /// Ordered failure reasons.
    Failed(Vec<String>),
}

impl DeterministicVerdict {
    pub fn first_reason(&self) -> Option<&str> {
        match self {
            DeterministicVerdict::Passed => None,
            DeterministicVerdict::Failed(reasons) => reasons.first().map(String::as_str),
        }
    }
}

/// How a raw lookup result reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Found,
    Empty,
    Error,
}

pub fn classify_lookup_result(raw: &str) -> LookupOutcome {
    let lowered = raw.to_lowercase();
    if ERROR_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return LookupOutcome::Error;
    }
    match raw.trim() {
        "" | "[]" | "null" => LookupOutcome::Empty,
        _ => LookupOutcome::Found,
    }
}

pub struct DeterministicValidator {
    gate: Arc<QuerySafetyGate>,
    lookup: Arc<EntityLookupService>,
    entities: EntityDescriptors,
    relationship: RelationshipDescriptor,
}

impl DeterministicValidator {
    pub fn new(
        gate: Arc<QuerySafetyGate>,
        lookup: Arc<EntityLookupService>,
        entities: EntityDescriptors,
        relationship: RelationshipDescriptor,
    ) -> Self {
        Self {
            gate,
            lookup,
            entities,
            relationship,
        }
    }

    pub async fn validate(&self, state: &RequestState) -> DeterministicVerdict {
        match self.check(state).await {
            Ok(()) => {
                info!("Deterministic validation passed");
                DeterministicVerdict::Passed
            }
            Err(e) => {
                info!("Deterministic validation failed: {}", e);
                DeterministicVerdict::Failed(vec![e.to_string()])
            }
        }
    }

    async fn check(&self, state: &RequestState) -> Result<()> {
        for kind in EntityKind::ALL {
            let name = match state.name(kind) {
                Some(name) => name,
                None => {
                    debug!("No {} extracted, skipping lookup", kind);
                    continue;
                }
            };
            self.check_entity(self.entities.get(kind), name).await?;
        }

        if let (Some(role), Some(application)) = (state.role_name(), state.application_name()) {
            self.check_relationship(role, application).await?;
        }
        Ok(())
    }

    async fn check_entity(&self, descriptor: &EntityDescriptor, name: &str) -> Result<()> {
        let instruction = format!(
            "Generate a SQL query that selects {} from {} where {} equals '{}'",
            descriptor.id_column,
            descriptor.table,
            descriptor.name_column,
            quote_value(name)
        );
        let raw = match self.run_lookup(&instruction, &descriptor.table).await {
            Ok(raw) => raw,
            Err(e) => return Err(ValidatorError::NotFound(format!("{}: {}", descriptor.error, e))),
        };

        match classify_lookup_result(&raw) {
            LookupOutcome::Found => Ok(()),
            LookupOutcome::Empty => Err(ValidatorError::NotFound(descriptor.error.clone())),
            LookupOutcome::Error => Err(ValidatorError::NotFound(format!("{}: {}", descriptor.error, raw))),
        }
    }

    async fn check_relationship(&self, role: &str, application: &str) -> Result<()> {
        let rel = &self.relationship;
        let instruction = format!(
            "Generate a SQL query that selects {} from {} where {} equals '{}' and {} equals '{}'",
            rel.id_column,
            rel.table,
            rel.role_column,
            quote_value(role),
            rel.application_column,
            quote_value(application)
        );
        let raw = match self.run_lookup(&instruction, &rel.table).await {
            Ok(raw) => raw,
            Err(e) => {
                return Err(ValidatorError::RelationshipInvalid(format!(
                    "Database error during relationship validation: {}",
                    e
                )))
            }
        };

        match classify_lookup_result(&raw) {
            LookupOutcome::Found => Ok(()),
            LookupOutcome::Empty => Err(ValidatorError::RelationshipInvalid(format!(
                "Relationship invalid: {} does not exist in {}. This role may belong to a different application.",
                role, application
            ))),
            LookupOutcome::Error => Err(ValidatorError::RelationshipInvalid(format!(
                "Database error during relationship validation: {}",
                raw
            ))),
        }
    }

    async fn run_lookup(&self, instruction: &str, table: &str) -> Result<String> {
        let query = self.gate.generate_validated(instruction, table).await?;
        let raw = self.lookup.run(&query).await.map_err(|e| {
            warn!("Lookup on '{}' failed: {}", table, e);
            e
        })?;
        Ok(raw)
    }
}

fn quote_value(value: &str) -> String {
    value.replace('\'', "''")
}
