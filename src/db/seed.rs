//! CSV seeding for the IAM store
//!
//! Expects `users.csv`, `applications.csv` and `roles.csv` with headers
//! matching the table columns. Missing files are skipped.

use crate::db::iam_store::{ApplicationRow, RoleRow, SqliteIamStore, UserRow};
use crate::error::Result;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub applications: usize,
    pub roles: usize,
}

pub fn seed_from_csv_dir(store: &SqliteIamStore, dir: impl AsRef<Path>) -> Result<SeedSummary> {
    let dir = dir.as_ref();
    let mut summary = SeedSummary::default();

    if let Some(users) = read_csv_file::<UserRow>(&dir.join("users.csv"))? {
        for user in &users {
            store.upsert_user(user)?;
        }
        summary.users = users.len();
    }
    if let Some(apps) = read_csv_file::<ApplicationRow>(&dir.join("applications.csv"))? {
        for app in &apps {
            store.upsert_application(app)?;
        }
        summary.applications = apps.len();
    }
    if let Some(roles) = read_csv_file::<RoleRow>(&dir.join("roles.csv"))? {
        for role in &roles {
            store.upsert_role(role)?;
        }
        summary.roles = roles.len();
    }

    info!(
        "Seeded IAM store from {}: {} users, {} applications, {} roles",
        dir.display(),
        summary.users,
        summary.applications,
        summary.roles
    );
    Ok(summary)
}

fn read_csv_file<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>> {
    if !path.exists() {
        warn!("Seed file {} not found, skipping", path.display());
        return Ok(None);
    }
    let file = std::fs::File::open(path)?;
    read_csv(file).map(Some)
}

pub fn read_csv<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}
