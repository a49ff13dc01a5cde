use crate::config::CrmConfig;
use crate::db::store::CredentialStore;
use crate::error::CrmError;
use oauth2::{AccessToken, AuthorizationCode, ClientId, ClientSecret, RefreshToken};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Access and refresh token, always handled together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

impl TokenPair {
    pub fn new(access_token: AccessToken, refresh_token: RefreshToken) -> Self {
        Self {
            access_token,
            refresh_token,
        }
    }
}

impl PartialEq for TokenPair {
    fn eq(&self, other: &Self) -> bool {
        self.access_token.secret() == other.access_token.secret()
            && self.refresh_token.secret() == other.refresh_token.secret()
    }
}

/// Wire form of the credential record. Every field is optional so that
/// partial documents can be merged into an existing holder.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialDocument {
    client_id: Option<String>,
    client_secret: Option<String>,
    authorization_key: Option<String>,
    redirect_uri: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Plain view of every credential field, secrets included.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSnapshot {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authorization_key: Option<String>,
    pub redirect_uri: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// OAuth client identity plus the current token pair.
///
/// The pair lives in a single `Option`, so a holder is either
/// unauthenticated or holds both tokens.
#[derive(Debug, Clone, Default)]
pub struct CredentialHolder {
    client_id: Option<ClientId>,
    client_secret: Option<ClientSecret>,
    authorization_key: Option<AuthorizationCode>,
    redirect_uri: Option<String>,
    tokens: Option<TokenPair>,
}

impl CredentialHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &CrmConfig) -> Self {
        let mut holder = Self::new();
        holder.load_from_config(cfg);
        holder
    }

    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        self.client_id = Some(ClientId::new(client_id.into()));
    }

    pub fn set_client_secret(&mut self, client_secret: impl Into<String>) {
        self.client_secret = Some(ClientSecret::new(client_secret.into()));
    }

    pub fn set_authorization_key(&mut self, authorization_key: impl Into<String>) {
        self.authorization_key = Some(AuthorizationCode::new(authorization_key.into()));
    }

    pub fn set_redirect_uri(&mut self, redirect_uri: impl Into<String>) {
        self.redirect_uri = Some(redirect_uri.into());
    }

    /// Replace both tokens at once.
    pub fn set_tokens(&mut self, tokens: TokenPair) {
        self.tokens = Some(tokens);
    }

    pub fn clear_tokens(&mut self) {
        self.tokens = None;
    }

    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    pub fn client_secret(&self) -> Option<&ClientSecret> {
        self.client_secret.as_ref()
    }

    pub fn authorization_key(&self) -> Option<&AuthorizationCode> {
        self.authorization_key.as_ref()
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.tokens.as_ref().map(|t| &t.access_token)
    }

    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.tokens.as_ref().map(|t| &t.refresh_token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    /// Client identity from configuration; tokens are left alone.
    pub fn load_from_config(&mut self, cfg: &CrmConfig) {
        self.client_id = cfg.client_id.clone().map(ClientId::new);
        self.client_secret = cfg.client_secret.clone().map(ClientSecret::new);
        self.authorization_key = cfg.authorization_key.clone().map(AuthorizationCode::new);
        self.redirect_uri = cfg.redirect_url.clone();
    }

    pub fn snapshot(&self) -> CredentialSnapshot {
        CredentialSnapshot {
            client_id: self.client_id.as_ref().map(|v| v.as_str().to_owned()),
            client_secret: self.client_secret.as_ref().map(|v| v.secret().clone()),
            authorization_key: self.authorization_key.as_ref().map(|v| v.secret().clone()),
            redirect_uri: self.redirect_uri.clone(),
            access_token: self.access_token().map(|v| v.secret().clone()),
            refresh_token: self.refresh_token().map(|v| v.secret().clone()),
        }
    }

    /// JSON form of the full record.
    pub fn serialize(&self) -> Result<String, CrmError> {
        let snap = self.snapshot();
        let doc = CredentialDocument {
            client_id: snap.client_id,
            client_secret: snap.client_secret,
            authorization_key: snap.authorization_key,
            redirect_uri: snap.redirect_uri,
            access_token: snap.access_token,
            refresh_token: snap.refresh_token,
        };
        Ok(serde_json::to_string(&doc)?)
    }

    /// Merge a JSON record into the holder. Absent or empty fields keep
    /// their current value.
    pub fn deserialize(&mut self, raw: &str) -> Result<(), CrmError> {
        let doc: CredentialDocument = serde_json::from_str(raw)?;
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());

        if let Some(v) = present(doc.client_id) {
            self.set_client_id(v);
        }
        if let Some(v) = present(doc.client_secret) {
            self.set_client_secret(v);
        }
        if let Some(v) = present(doc.authorization_key) {
            self.set_authorization_key(v);
        }
        if let Some(v) = present(doc.redirect_uri) {
            self.set_redirect_uri(v);
        }

        match (present(doc.access_token), present(doc.refresh_token)) {
            (Some(access), Some(refresh)) => {
                self.set_tokens(TokenPair::new(
                    AccessToken::new(access),
                    RefreshToken::new(refresh),
                ));
            }
            (None, None) => {}
            (access, refresh) => match self.tokens.as_mut() {
                Some(current) => {
                    if let Some(access) = access {
                        current.access_token = AccessToken::new(access);
                    }
                    if let Some(refresh) = refresh {
                        current.refresh_token = RefreshToken::new(refresh);
                    }
                }
                None => {
                    warn!("credential document carries a single token and no pair is held; ignoring it");
                }
            },
        }
        Ok(())
    }

    /// Merge the record stored at `path`.
    pub async fn load_from_file(&mut self, path: &Path) -> Result<(), CrmError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .inspect_err(|e| error!(path = %path.display(), error = %e, "failed to read credentials file"))?;
        self.deserialize(&raw)
            .inspect_err(|e| error!(path = %path.display(), error = %e, "failed to parse credentials file"))?;
        info!(path = %path.display(), "credentials loaded from file");
        Ok(())
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<(), CrmError> {
        let raw = self.serialize()?;
        tokio::fs::write(path, raw)
            .await
            .inspect_err(|e| error!(path = %path.display(), error = %e, "failed to write credentials file"))?;
        Ok(())
    }
}

/// The process-wide holder, shared by every request cycle.
///
/// The lock is never held across network or store calls; concurrent cycles
/// may observe each other's tokens.
#[derive(Clone, Default)]
pub struct SharedCredentials {
    inner: Arc<RwLock<CredentialHolder>>,
}

impl SharedCredentials {
    pub fn new(holder: CredentialHolder) -> Self {
        Self {
            inner: Arc::new(RwLock::new(holder)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, CredentialHolder> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, CredentialHolder> {
        self.inner.write().await
    }

    pub async fn tokens(&self) -> Option<TokenPair> {
        self.inner.read().await.tokens().cloned()
    }

    pub async fn set_tokens(&self, tokens: TokenPair) {
        self.inner.write().await.set_tokens(tokens);
    }

    pub async fn snapshot(&self) -> CredentialSnapshot {
        self.inner.read().await.snapshot()
    }

    /// Pull the token pair stored under `name` into the holder.
    ///
    /// Returns the applied pair; `None` when no record exists (holder left
    /// untouched) or the record is incomplete (holder tokens cleared).
    pub async fn load_from_store(
        &self,
        store: &dyn CredentialStore,
        name: &str,
    ) -> Result<Option<TokenPair>, CrmError> {
        let record = store.find_one(name).await.inspect_err(|e| {
            error!(integration = %name, error = %e, "failed to load tokens from store");
        })?;
        let Some(record) = record else {
            debug!(integration = %name, "no stored tokens; keeping in-memory state");
            return Ok(None);
        };
        let pair = record.token_pair();
        let mut holder = self.inner.write().await;
        match &pair {
            Some(p) => holder.set_tokens(p.clone()),
            None => {
                warn!(integration = %name, "stored record has an incomplete token pair; clearing tokens");
                holder.clear_tokens();
            }
        }
        Ok(pair)
    }

    /// Upsert the current token pair under `name`.
    pub async fn save_to_store(&self, store: &dyn CredentialStore, name: &str) -> Result<(), CrmError> {
        let Some(tokens) = self.tokens().await else {
            warn!(integration = %name, "nothing to persist; holder is not authenticated");
            return Err(CrmError::NotAuthenticated);
        };
        store.upsert(name, &tokens).await.inspect_err(|e| {
            error!(integration = %name, error = %e, "failed to persist tokens");
        })?;
        debug!(integration = %name, "tokens persisted");
        Ok(())
    }
}
