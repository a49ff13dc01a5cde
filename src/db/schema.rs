//! SQL DDL for initializing the bridge storage.

/// SQLite schema with:
/// - `integrations`: one token record per integration `name` (UNIQUE)
/// - `students`: leads projected from CRM webhooks, keyed by `phone` (UNIQUE)
/// - timestamps stored as RFC3339 text
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS integrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    access_token TEXT NULL,
    refresh_token TEXT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    email TEXT NULL,
    phone TEXT NOT NULL UNIQUE,
    links TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
