use crate::amocrm::credentials::TokenPair;
use crate::db::models::{IntegrationRecord, NewStudent};
use crate::error::CrmError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// Durable home of the integration's token record.
///
/// Implementations need no cross-process locking: the last upsert wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the record stored under `name`, if any.
    async fn find_one(&self, name: &str) -> Result<Option<IntegrationRecord>, CrmError>;

    /// Update the record under `name`, creating it when absent.
    async fn upsert(&self, name: &str, tokens: &TokenPair) -> Result<IntegrationRecord, CrmError>;
}

/// Sink for students projected from webhook leads.
#[async_trait]
pub trait StudentStore: Send + Sync {
    /// Upsert keyed by phone; returns the row id.
    async fn upsert_student(&self, student: &NewStudent) -> Result<i64, CrmError>;
}

/// Process-local store, used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    integrations: Mutex<HashMap<String, IntegrationRecord>>,
    students: Mutex<Vec<NewStudent>>,
    failing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails, to exercise failure paths.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Seed a record directly, bypassing the pair check.
    pub fn insert(&self, name: &str, access_token: Option<&str>, refresh_token: Option<&str>) {
        let mut map = self.integrations.lock().unwrap_or_else(|e| e.into_inner());
        let id = map.len() as i64 + 1;
        map.insert(
            name.to_string(),
            IntegrationRecord {
                id,
                name: name.to_string(),
                access_token: access_token.map(str::to_string),
                refresh_token: refresh_token.map(str::to_string),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<IntegrationRecord> {
        self.integrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn students(&self) -> Vec<NewStudent> {
        self.students
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check(&self) -> Result<(), CrmError> {
        if self.failing {
            return Err(CrmError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_one(&self, name: &str) -> Result<Option<IntegrationRecord>, CrmError> {
        self.check()?;
        Ok(self.get(name))
    }

    async fn upsert(&self, name: &str, tokens: &TokenPair) -> Result<IntegrationRecord, CrmError> {
        self.check()?;
        let mut map = self.integrations.lock().unwrap_or_else(|e| e.into_inner());
        let next_id = map.len() as i64 + 1;
        let record = map
            .entry(name.to_string())
            .or_insert_with(|| IntegrationRecord {
                id: next_id,
                name: name.to_string(),
                access_token: None,
                refresh_token: None,
                updated_at: Utc::now(),
            });
        record.access_token = Some(tokens.access_token.secret().clone());
        record.refresh_token = Some(tokens.refresh_token.secret().clone());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn upsert_student(&self, student: &NewStudent) -> Result<i64, CrmError> {
        self.check()?;
        let mut students = self.students.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = students.iter().position(|s| s.phone == student.phone) {
            let email = student.email.clone().or(students[pos].email.take());
            students[pos] = NewStudent {
                email,
                ..student.clone()
            };
            return Ok(pos as i64 + 1);
        }
        students.push(student.clone());
        Ok(students.len() as i64)
    }
}
