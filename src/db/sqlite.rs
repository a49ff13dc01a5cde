use crate::amocrm::credentials::TokenPair;
use crate::db::models::{IntegrationRecord, NewStudent, StudentRecord};
use crate::db::schema::SQLITE_INIT;
use crate::db::store::{CredentialStore, StudentStore};
use crate::error::CrmError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

pub type SqlitePool = Pool<Sqlite>;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url` and apply the schema.
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self, CrmError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .acquire_timeout(acquire_timeout)
            .connect_with(connect_opts)
            .await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Single-connection in-memory database; the connection is never recycled.
    pub async fn in_memory() -> Result<Self, CrmError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), CrmError> {
        // sqlx::query runs one statement at a time
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn get_student_by_phone(&self, phone: &str) -> Result<Option<StudentRecord>, CrmError> {
        let row = sqlx::query(
            r#"SELECT id, first_name, last_name, email, phone, links, created_at, updated_at
               FROM students WHERE phone = ?"#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_student).transpose()
    }

    fn row_to_integration(row: SqliteRow) -> Result<IntegrationRecord, CrmError> {
        let updated_at: String = row.try_get("updated_at")?;
        Ok(IntegrationRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }

    fn row_to_student(row: SqliteRow) -> Result<StudentRecord, CrmError> {
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(StudentRecord {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            links: row.try_get("links")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CrmError> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc);
    Ok(ts)
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn find_one(&self, name: &str) -> Result<Option<IntegrationRecord>, CrmError> {
        let row = sqlx::query(
            r#"SELECT id, name, access_token, refresh_token, updated_at
               FROM integrations WHERE name = ?"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_integration).transpose()
    }

    /// Uses SQLite `INSERT ... ON CONFLICT(name) DO UPDATE`.
    async fn upsert(&self, name: &str, tokens: &TokenPair) -> Result<IntegrationRecord, CrmError> {
        sqlx::query(
            r#"
            INSERT INTO integrations (name, access_token, refresh_token, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                access_token=excluded.access_token,
                refresh_token=excluded.refresh_token,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(tokens.access_token.secret())
        .bind(tokens.refresh_token.secret())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_one(name)
            .await?
            .ok_or(CrmError::Database(sqlx::Error::RowNotFound))
    }
}

#[async_trait]
impl StudentStore for SqliteStore {
    async fn upsert_student(&self, student: &NewStudent) -> Result<i64, CrmError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO students (first_name, last_name, email, phone, links, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(phone) DO UPDATE SET
                first_name=excluded.first_name,
                last_name=excluded.last_name,
                email=COALESCE(excluded.email, students.email),
                links=excluded.links,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(&student.first_name)
        .bind(&student.last_name)
        .bind(&student.email)
        .bind(&student.phone)
        .bind(&student.links)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let rec: (i64,) = sqlx::query_as("SELECT id FROM students WHERE phone = ?")
            .bind(&student.phone)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }
}
