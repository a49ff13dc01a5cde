pub mod amocrm;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod service;
pub mod types;

pub use amocrm::{AmoCrmClient, CredentialHolder, SharedCredentials, TokenPair};
pub use error::CrmError;
pub use service::{CrmService, LeadSync};
