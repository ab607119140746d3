//! SQLite-backed IAM store

use crate::error::{Result, ValidatorError};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// IAM store collaborator: runs one read query and returns its rows as text.
#[async_trait]
pub trait IamStore: Send + Sync {
    /// Rows come back as a JSON array of column→value objects (`[]` when empty).
    async fn run_read_query(&self, sql: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: i64,
    pub user_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub manager: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRow {
    pub app_id: i64,
    pub app_name: String,
    #[serde(default)]
    pub app_owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRow {
    pub role_id: i64,
    pub role_name: String,
    pub app_name: String,
    #[serde(default)]
    pub owner: Option<String>,
}

pub struct SqliteIamStore {
    db: Mutex<Connection>,
}

impl SqliteIamStore {
    /// Open or create the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)?;
        info!("Opened IAM store at {}", path.display());
        Self::with_connection(db)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        let store = Self { db: Mutex::new(db) };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| ValidatorError::Store("IAM store connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.lock()?;
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                user_name TEXT NOT NULL UNIQUE,
                email TEXT,
                manager TEXT
            );
            CREATE TABLE IF NOT EXISTS applications (
                app_id INTEGER PRIMARY KEY,
                app_name TEXT NOT NULL UNIQUE,
                app_owner TEXT
            );
            CREATE TABLE IF NOT EXISTS roles (
                role_id INTEGER PRIMARY KEY,
                role_name TEXT NOT NULL,
                app_name TEXT NOT NULL,
                owner TEXT,
                UNIQUE(role_name, app_name)
            );
            CREATE INDEX IF NOT EXISTS idx_roles_app_name ON roles(app_name);
            "#,
        )?;
        Ok(())
    }

    pub fn upsert_user(&self, user: &UserRow) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO users (user_id, user_name, email, manager) VALUES (?1, ?2, ?3, ?4)",
            params![user.user_id, user.user_name, user.email, user.manager],
        )?;
        Ok(())
    }

    pub fn upsert_application(&self, app: &ApplicationRow) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO applications (app_id, app_name, app_owner) VALUES (?1, ?2, ?3)",
            params![app.app_id, app.app_name, app.app_owner],
        )?;
        Ok(())
    }

    pub fn upsert_role(&self, role: &RoleRow) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO roles (role_id, role_name, app_name, owner) VALUES (?1, ?2, ?3, ?4)",
            params![role.role_id, role.role_name, role.app_name, role.owner],
        )?;
        Ok(())
    }

    pub fn users(&self) -> Result<Vec<UserRow>> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT user_id, user_name, email, manager FROM users ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRow {
                user_id: row.get(0)?,
                user_name: row.get(1)?,
                email: row.get(2)?,
                manager: row.get(3)?,
            })
        })?;
        let collected = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(collected)
    }

    pub fn applications(&self) -> Result<Vec<ApplicationRow>> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT app_id, app_name, app_owner FROM applications ORDER BY app_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ApplicationRow {
                app_id: row.get(0)?,
                app_name: row.get(1)?,
                app_owner: row.get(2)?,
            })
        })?;
        let collected = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(collected)
    }

    pub fn roles(&self) -> Result<Vec<RoleRow>> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT role_id, role_name, app_name, owner FROM roles ORDER BY role_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(RoleRow {
                role_id: row.get(0)?,
                role_name: row.get(1)?,
                app_name: row.get(2)?,
                owner: row.get(3)?,
            })
        })?;
        let collected = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(collected)
    }

    fn query_to_json(&self, sql: &str) -> Result<String> {
        let db = self.lock()?;
        let mut stmt = db.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut out = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut object = serde_json::Map::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = match row.get_ref(idx)? {
                    ValueRef::Null => serde_json::Value::Null,
                    ValueRef::Integer(n) => serde_json::Value::from(n),
                    ValueRef::Real(f) => serde_json::Value::from(f),
                    ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
                };
                object.insert(column.clone(), value);
            }
            out.push(serde_json::Value::Object(object));
        }

        Ok(serde_json::to_string(&out)?)
    }
}

#[async_trait]
impl IamStore for SqliteIamStore {
    async fn run_read_query(&self, sql: &str) -> Result<String> {
        debug!("Running read query: {}", sql);
        self.query_to_json(sql)
            .map_err(|e| ValidatorError::Store(format!("Error: unable to execute query: {}", e)))
    }
}
