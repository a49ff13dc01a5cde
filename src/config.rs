use crate::error::CrmError;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// amoCRM connection settings, read from `AMOCRM_*` variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    pub url: Url,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authorization_key: Option<String>,
    pub redirect_url: Option<String>,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost").expect("static default URL is valid"),
            client_id: None,
            client_secret: None,
            authorization_key: None,
            redirect_url: None,
        }
    }
}

impl CrmConfig {
    /// `url` has no fallback: a bridge without `AMOCRM_URL` refuses to start.
    fn extract(figment: Figment) -> Result<Self, CrmError> {
        Ok(figment.extract()?)
    }
}

/// Service settings, read from `BRIDGE_*` variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    /// Name of the single stored credential record.
    pub integration_name: String,
    pub admin_key: String,
    /// Pipeline status that turns a lead into a student.
    pub exam_status_name: String,
    pub request_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub rate_limit_per_second: u32,
    pub retry_attempts: usize,
    pub credentials_file: Option<PathBuf>,
    #[serde(skip)]
    pub crm: CrmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_url: "sqlite://crm-bridge.sqlite".to_string(),
            loglevel: "info".to_string(),
            integration_name: "amocrm".to_string(),
            admin_key: String::new(),
            exam_status_name: "назначен экзамен".to_string(),
            request_timeout_secs: 15,
            store_timeout_secs: 5,
            rate_limit_per_second: 7,
            retry_attempts: 3,
            credentials_file: None,
            crm: CrmConfig::default(),
        }
    }
}

impl Config {
    /// Read both settings groups from the process environment.
    pub fn load() -> Result<Self, CrmError> {
        let mut cfg: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("BRIDGE_"))
            .extract()?;
        cfg.crm = CrmConfig::extract(Figment::new().merge(Env::prefixed("AMOCRM_")))?;
        Ok(cfg)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_environment() {
        let cfg = Config::default();
        assert_eq!(cfg.integration_name, "amocrm");
        assert_eq!(cfg.rate_limit_per_second, 7);
        assert_eq!(cfg.store_timeout(), Duration::from_secs(5));
        assert!(cfg.crm.client_id.is_none());
    }

    #[test]
    fn crm_settings_extract_from_prefixed_provider() {
        let crm = CrmConfig::extract(Figment::from(Serialized::defaults(serde_json::json!({
            "url": "https://example.amocrm.ru",
            "client_id": "cid",
            "redirect_url": "https://bridge.example/callback",
        }))))
        .expect("extract crm config");
        assert_eq!(crm.url.as_str(), "https://example.amocrm.ru/");
        assert_eq!(crm.client_id.as_deref(), Some("cid"));
        assert!(crm.client_secret.is_none());
    }

    #[test]
    fn crm_url_is_required() {
        let missing = CrmConfig::extract(Figment::from(Serialized::defaults(
            serde_json::json!({ "client_id": "cid" }),
        )));
        assert!(matches!(missing, Err(CrmError::Config(_))));
    }
}
