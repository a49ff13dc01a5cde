use crm_bridge::amocrm::{AmoCrmClient, CredentialHolder, SharedCredentials, validate_field_mapping};
use crm_bridge::config::Config;
use crm_bridge::db::{CredentialStore, SqliteStore, StudentStore};
use crm_bridge::router::{BridgeState, bridge_router};
use crm_bridge::service::{CrmService, LeadSync};
use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        crm_url = %cfg.crm.url,
        database_url = %cfg.database_url,
        integration = %cfg.integration_name,
        loglevel = %cfg.loglevel,
        admin_key_set = !cfg.admin_key.is_empty()
    );

    validate_field_mapping()?;

    let store = Arc::new(SqliteStore::connect(&cfg.database_url, cfg.store_timeout()).await?);

    let mut holder = CredentialHolder::from_config(&cfg.crm);
    if let Some(path) = cfg.credentials_file.as_ref() {
        match holder.load_from_file(path).await {
            Ok(()) => info!(path = %path.display(), "credentials file applied"),
            Err(e) => warn!(path = %path.display(), error = %e, "credentials file not loaded"),
        }
    }
    let credentials = SharedCredentials::new(holder);

    let client = AmoCrmClient::new(&cfg, credentials)?;
    let credential_store: Arc<dyn CredentialStore> = store.clone();
    let student_store: Arc<dyn StudentStore> = store;
    let service = Arc::new(CrmService::new(client, credential_store, &cfg));

    match service.load_credentials().await {
        Ok(Some(_)) => info!("stored tokens loaded"),
        Ok(None) => warn!("no stored tokens; POST /amocrm/oauth or /amocrm/set-tokens to bootstrap"),
        Err(e) => warn!(error = %e, "initial token load failed"),
    }

    let lead_sync = Arc::new(LeadSync::new(student_store, &cfg));
    let state = BridgeState::new(service, lead_sync, Arc::from(cfg.admin_key.as_str()));
    let app = bridge_router(state);

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
