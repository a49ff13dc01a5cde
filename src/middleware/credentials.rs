use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::internal_error_response;
use crate::router::BridgeState;

/// Hydrate the shared holder from the store before every CRM route.
pub async fn load_credentials(State(state): State<BridgeState>, req: Request, next: Next) -> Response {
    match state.service.load_credentials().await {
        Ok(loaded) => {
            debug!(loaded = loaded.is_some(), "credentials loaded for request");
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Refresh the token pair and persist it before the wrapped handler runs.
/// Any failure, credential rejection included, ends the request with a 500.
pub async fn refresh_tokens(State(state): State<BridgeState>, req: Request, next: Next) -> Response {
    match state.service.refresh_and_persist().await {
        Ok(_) => next.run(req).await,
        Err(_) => internal_error_response(),
    }
}
