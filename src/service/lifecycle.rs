use crate::amocrm::{AmoCrmClient, CredentialSnapshot, SharedCredentials, TokenPair};
use crate::config::Config;
use crate::db::{CredentialStore, IntegrationRecord};
use crate::error::CrmError;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Ties the API client to the credential store: load before use, refresh
/// then persist.
pub struct CrmService {
    client: AmoCrmClient,
    store: Arc<dyn CredentialStore>,
    integration_name: String,
    store_timeout: Duration,
    credentials_file: Option<PathBuf>,
}

impl CrmService {
    pub fn new(client: AmoCrmClient, store: Arc<dyn CredentialStore>, cfg: &Config) -> Self {
        Self {
            client,
            store,
            integration_name: cfg.integration_name.clone(),
            store_timeout: cfg.store_timeout(),
            credentials_file: cfg.credentials_file.clone(),
        }
    }

    pub fn client(&self) -> &AmoCrmClient {
        &self.client
    }

    pub fn credentials(&self) -> &SharedCredentials {
        self.client.credentials()
    }

    pub fn integration_name(&self) -> &str {
        &self.integration_name
    }

    /// Hydrate the holder from the stored record.
    pub async fn load_credentials(&self) -> Result<Option<TokenPair>, CrmError> {
        self.bounded(
            self.credentials()
                .load_from_store(self.store.as_ref(), &self.integration_name),
        )
        .await
    }

    /// Flush the holder's current pair to the store.
    pub async fn persist_credentials(&self) -> Result<(), CrmError> {
        self.bounded(
            self.credentials()
                .save_to_store(self.store.as_ref(), &self.integration_name),
        )
        .await
    }

    pub async fn stored_record(&self) -> Result<Option<IntegrationRecord>, CrmError> {
        self.bounded(self.store.find_one(&self.integration_name)).await
    }

    pub async fn credential_snapshot(&self) -> CredentialSnapshot {
        self.credentials().snapshot().await
    }

    /// Reissue tokens, then persist whatever pair the holder ends up with.
    ///
    /// A refresh failure wins over a persist failure; a successful refresh
    /// whose persist fails is reported as the persist error.
    pub async fn refresh_and_persist(&self) -> Result<TokenPair, CrmError> {
        let refreshed = self.client.reissue_tokens().await;
        let persisted = self.persist_credentials().await;
        match (refreshed, persisted) {
            (Ok(pair), Ok(())) => Ok(pair),
            (Err(e), persisted) => {
                if let Err(pe) = persisted {
                    warn!(error = %pe, "persist after failed refresh also failed");
                }
                error!(integration = %self.integration_name, error = %e, "token refresh failed");
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
        }
    }

    /// Initial bootstrap from the authorization key.
    pub async fn authenticate_and_persist(&self) -> Result<TokenPair, CrmError> {
        let pair = self.client.authenticate().await?;
        self.persist_credentials().await?;
        if let Some(path) = &self.credentials_file {
            let holder = self.credentials().read().await.clone();
            if let Err(e) = holder.save_to_file(path).await {
                warn!(path = %path.display(), error = %e, "credential file not updated");
            }
        }
        info!(integration = %self.integration_name, "integration authenticated");
        Ok(pair)
    }

    /// Install a pair obtained out of band and store it.
    pub async fn set_tokens_and_persist(&self, pair: TokenPair) -> Result<IntegrationRecord, CrmError> {
        self.credentials().set_tokens(pair.clone()).await;
        let record = self
            .bounded(self.store.upsert(&self.integration_name, &pair))
            .await?;
        info!(integration = %self.integration_name, "tokens installed manually");
        Ok(record)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CrmError>
    where
        F: Future<Output = Result<T, CrmError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout = ?self.store_timeout, "credential store timed out");
                Err(CrmError::StoreTimeout(self.store_timeout))
            }
        }
    }
}
