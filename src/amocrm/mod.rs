pub mod client;
pub mod contact;
pub mod credentials;
mod endpoints;

pub use client::{AmoCrmClient, LeadInfo};
pub use contact::{ContactField, ContactInfo, FieldValue, validate_field_mapping};
pub use credentials::{CredentialHolder, CredentialSnapshot, SharedCredentials, TokenPair};
