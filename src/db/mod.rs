//! Database module: persistence for credentials and projected students.
//!
//! Layout:
//! - `store.rs`: storage traits consumed by the core, plus an in-memory store
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: sqlx-backed implementation of the storage traits

pub mod models;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use models::{IntegrationRecord, NewStudent, StudentRecord};
pub use schema::SQLITE_INIT;
pub use sqlite::{SqlitePool, SqliteStore};
pub use store::{CredentialStore, MemoryStore, StudentStore};
