//! Validator configuration
//!
//! Static settings read once at startup: backend endpoints, retrieval tuning,
//! the extraction timeout and the entity descriptor table. Loaded from a JSON
//! file with environment overrides applied on top.

use crate::error::{Result, ValidatorError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// The three extractable slots of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Application,
    Role,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::User, EntityKind::Application, EntityKind::Role];

    /// JSON key the classifier must answer with.
    pub fn field_name(&self) -> &'static str {
        match self {
            EntityKind::User => "user_name",
            EntityKind::Application => "application_name",
            EntityKind::Role => "role_name",
        }
    }

    /// Value of the `EntityType` metadata key on knowledge entries.
    pub fn entity_type(&self) -> &'static str {
        match self {
            EntityKind::User => "User",
            EntityKind::Application => "Application",
            EntityKind::Role => "Role",
        }
    }

    /// Metadata key holding the entity's display name.
    pub fn metadata_name_key(&self) -> &'static str {
        match self {
            EntityKind::User => "UserName",
            EntityKind::Application => "AppName",
            EntityKind::Role => "RoleName",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_type())
    }
}

/// Where an entity kind lives in the IAM store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub table: String,
    pub id_column: String,
    pub name_column: String,
    /// Message reported when the entity cannot be found.
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptors {
    pub user: EntityDescriptor,
    pub application: EntityDescriptor,
    pub role: EntityDescriptor,
}

impl EntityDescriptors {
    pub fn get(&self, kind: EntityKind) -> &EntityDescriptor {
        match kind {
            EntityKind::User => &self.user,
            EntityKind::Application => &self.application,
            EntityKind::Role => &self.role,
        }
    }

    /// Descriptors in validation order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &EntityDescriptor)> {
        EntityKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    /// The only tables a generated query may read.
    pub fn tables(&self) -> Vec<String> {
        self.iter().map(|(_, d)| d.table.clone()).collect()
    }
}

impl Default for EntityDescriptors {
    fn default() -> Self {
        Self {
            user: EntityDescriptor {
                table: "users".to_string(),
                id_column: "user_id".to_string(),
                name_column: "user_name".to_string(),
                error: "User does not exist in the IAM system".to_string(),
            },
            application: EntityDescriptor {
                table: "applications".to_string(),
                id_column: "app_id".to_string(),
                name_column: "app_name".to_string(),
                error: "Application does not exist in the IAM system".to_string(),
            },
            role: EntityDescriptor {
                table: "roles".to_string(),
                id_column: "role_id".to_string(),
                name_column: "role_name".to_string(),
                error: "Role does not exist in the IAM system".to_string(),
            },
        }
    }
}

/// Role-to-application link checked after both entities resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub table: String,
    pub id_column: String,
    pub role_column: String,
    pub application_column: String,
}

impl Default for RelationshipDescriptor {
    fn default() -> Self {
        Self {
            table: "roles".to_string(),
            id_column: "role_id".to_string(),
            role_column: "role_name".to_string(),
            application_column: "app_name".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            temperature: 0.0,
            max_tokens: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub score_threshold: f32,
    /// Entries fetched when building extraction hints.
    pub hint_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 3,
            score_threshold: 0.6,
            hint_k: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/iam.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub extraction: ExtractionConfig,
    pub entities: EntityDescriptors,
    pub relationship: RelationshipDescriptor,
    pub store: StoreConfig,
}

impl ValidatorConfig {
    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ValidatorError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut config: ValidatorConfig = serde_json::from_str(&content)
            .map_err(|e| ValidatorError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("IAM_LLM_BASE_URL") {
            self.llm.base_url = url.clone();
            self.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("IAM_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = std::env::var("IAM_LLM_API_KEY") {
            self.llm.api_key = Some(key.clone());
            self.embedding.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("IAM_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(path) = std::env::var("IAM_DB_PATH") {
            self.store.path = path;
        }
        if let Ok(secs) = std::env::var("IAM_EXTRACTION_TIMEOUT_SECS") {
            self.extraction.timeout_secs = secs.trim().parse().map_err(|_| {
                ValidatorError::Config(format!("IAM_EXTRACTION_TIMEOUT_SECS is not a number: {}", secs))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (kind, descriptor) in self.entities.iter() {
            for (field, value) in [
                ("table", &descriptor.table),
                ("id_column", &descriptor.id_column),
                ("name_column", &descriptor.name_column),
            ] {
                if value.trim().is_empty() {
                    return Err(ValidatorError::Config(format!("{} descriptor has empty {}", kind, field)));
                }
            }
            if !seen.insert(descriptor.table.to_lowercase()) {
                return Err(ValidatorError::Config(format!(
                    "Table '{}' is configured for more than one entity kind",
                    descriptor.table
                )));
            }
        }
        if !seen.contains(&self.relationship.table.to_lowercase()) {
            return Err(ValidatorError::Config(format!(
                "Relationship table '{}' is not a configured entity table",
                self.relationship.table
            )));
        }
        if self.retrieval.k == 0 {
            return Err(ValidatorError::Config("retrieval.k must be at least 1".to_string()));
        }
        Ok(())
    }
}
