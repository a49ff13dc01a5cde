use crate::amocrm::credentials::TokenPair;
use chrono::{DateTime, Utc};
use oauth2::{AccessToken, RefreshToken};
use serde::{Deserialize, Serialize};

/// Stored OAuth state of one integration. Only tokens are persisted here;
/// client identity comes from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationRecord {
    pub id: i64,
    pub name: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationRecord {
    /// The stored pair, when both halves are present.
    pub fn token_pair(&self) -> Option<TokenPair> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Some(TokenPair::new(
                    AccessToken::new(access.clone()),
                    RefreshToken::new(refresh.clone()),
                ))
            }
            _ => None,
        }
    }
}

/// Student data projected from a CRM contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub links: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub links: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
