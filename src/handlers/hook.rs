use crate::service::lead_sync::{HookOutcome, IgnoreReason};
use crate::types::hook::{LeadStatusEvent, decode_hook_body};
use crate::{CrmError, router::BridgeState};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header::CONTENT_TYPE},
};
use tracing::{debug, warn};

/// POST /amocrm/hook -> amoCRM webhook; tokens were refreshed by middleware.
pub async fn lead_hook(
    State(state): State<BridgeState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HookOutcome>, CrmError> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let doc = decode_hook_body(content_type, &body)?;
    debug!(payload = %doc, "webhook received");

    let Some(event) = LeadStatusEvent::from_document(&doc) else {
        warn!("webhook without lead status change");
        return Ok(Json(HookOutcome::ignored(IgnoreReason::NoLeadStatus)));
    };
    let outcome = state
        .lead_sync
        .handle(state.service.client(), &event)
        .await?;
    Ok(Json(outcome))
}
