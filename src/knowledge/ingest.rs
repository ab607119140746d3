//! Knowledge ingestion
//!
//! Turns IAM store rows into knowledge snippets: one per role, user and
//! application, with the names the semantic tier filters on kept as metadata.

use crate::db::SqliteIamStore;
use crate::error::Result;
use crate::knowledge::InMemoryKnowledgeStore;
use std::collections::HashMap;
use tracing::info;

pub async fn ingest_iam_store(store: &SqliteIamStore, knowledge: &InMemoryKnowledgeStore) -> Result<usize> {
    let mut count = 0;

    for role in store.roles()? {
        let mut metadata = HashMap::new();
        metadata.insert("EntityType".to_string(), "Role".to_string());
        metadata.insert("RoleID".to_string(), role.role_id.to_string());
        metadata.insert("RoleName".to_string(), role.role_name.clone());
        metadata.insert("AppName".to_string(), role.app_name.clone());
        if let Some(ref owner) = role.owner {
            metadata.insert("Owner".to_string(), owner.clone());
        }
        let text = format!(
            "Role {} belongs to the {} application. Role ID is {}. The role owner is {}.",
            role.role_name,
            role.app_name,
            role.role_id,
            role.owner.as_deref().unwrap_or("unknown")
        );
        knowledge
            .add_document(format!("role:{}", role.role_id), text, metadata)
            .await?;
        count += 1;
    }

    for user in store.users()? {
        let mut metadata = HashMap::new();
        metadata.insert("EntityType".to_string(), "User".to_string());
        metadata.insert("UserID".to_string(), user.user_id.to_string());
        metadata.insert("UserName".to_string(), user.user_name.clone());
        if let Some(ref email) = user.email {
            metadata.insert("Email".to_string(), email.clone());
        }
        let text = format!(
            "User {} has user ID {}. Email address is {}. The manager of this user is {}.",
            user.user_name,
            user.user_id,
            user.email.as_deref().unwrap_or("unknown"),
            user.manager.as_deref().unwrap_or("unknown")
        );
        knowledge
            .add_document(format!("user:{}", user.user_id), text, metadata)
            .await?;
        count += 1;
    }

    for app in store.applications()? {
        let mut metadata = HashMap::new();
        metadata.insert("EntityType".to_string(), "Application".to_string());
        metadata.insert("AppID".to_string(), app.app_id.to_string());
        metadata.insert("AppName".to_string(), app.app_name.clone());
        let text = format!(
            "Application {} has application ID {}. The application owner is {}.",
            app.app_name,
            app.app_id,
            app.app_owner.as_deref().unwrap_or("unknown")
        );
        knowledge
            .add_document(format!("application:{}", app.app_id), text, metadata)
            .await?;
        count += 1;
    }

    info!("Ingested {} knowledge entries from the IAM store", count);
    Ok(count)
}
