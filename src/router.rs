use crate::handlers::{crm, hook};
use crate::middleware::{load_credentials, refresh_tokens};
use crate::service::{CrmService, LeadSync};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;

// amoCRM hooks are small form posts
const HOOK_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
pub struct BridgeState {
    pub service: Arc<CrmService>,
    pub lead_sync: Arc<LeadSync>,
    pub admin_key: Arc<str>,
}

impl BridgeState {
    pub fn new(service: Arc<CrmService>, lead_sync: Arc<LeadSync>, admin_key: Arc<str>) -> Self {
        Self {
            service,
            lead_sync,
            admin_key,
        }
    }
}

pub fn bridge_router(state: BridgeState) -> Router {
    let hook_routes = Router::new()
        .route("/hook", post(hook::lead_hook))
        .route_layer(from_fn_with_state(state.clone(), refresh_tokens))
        .layer(DefaultBodyLimit::max(HOOK_BODY_LIMIT));

    let crm_routes = Router::new()
        .route("/health-check", get(crm::health_check))
        .route("/can-access-api", get(crm::can_access_api))
        .route("/set-tokens", post(crm::set_tokens))
        .route("/oauth", post(crm::oauth))
        .route("/reissue-tokens", post(crm::reissue_tokens))
        .route("/diagnostics", get(crm::diagnostics))
        .merge(hook_routes)
        .route_layer(from_fn_with_state(state.clone(), load_credentials));

    Router::new()
        .nest("/amocrm", crm_routes)
        .with_state(state)
}
