//! IAM store
//!
//! The authoritative users/applications/roles tables. The validation core
//! only ever asks it to run an already-validated read query.

pub mod iam_store;
pub mod seed;

pub use iam_store::{ApplicationRow, IamStore, RoleRow, SqliteIamStore, UserRow};
