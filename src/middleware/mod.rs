pub mod auth;
pub mod credentials;

pub use auth::{RequireAdminKey, ensure_authorized};
pub use credentials::{load_credentials, refresh_tokens};
