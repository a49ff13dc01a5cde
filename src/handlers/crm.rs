use crate::amocrm::{CredentialSnapshot, TokenPair};
use crate::db::IntegrationRecord;
use crate::middleware::RequireAdminKey;
use crate::{CrmError, router::BridgeState};
use axum::{Json, extract::State};
use oauth2::{AccessToken, RefreshToken};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTokensBody {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthBody {
    pub client_id: String,
    pub client_secret: String,
    pub authorization_key: String,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Diagnostics {
    pub stored: Option<IntegrationRecord>,
    pub credentials: CredentialSnapshot,
}

/// GET /amocrm/health-check
pub async fn health_check(State(state): State<BridgeState>) -> Json<bool> {
    Json(state.service.client().health_check().await)
}

/// GET /amocrm/can-access-api
pub async fn can_access_api(State(state): State<BridgeState>) -> Json<bool> {
    Json(state.service.client().can_access_api().await)
}

/// POST /amocrm/set-tokens -> installs a pair obtained elsewhere.
pub async fn set_tokens(
    _auth: RequireAdminKey,
    State(state): State<BridgeState>,
    Json(body): Json<SetTokensBody>,
) -> Result<Json<IntegrationRecord>, CrmError> {
    if body.access_token.trim().is_empty() || body.refresh_token.trim().is_empty() {
        return Err(CrmError::InvalidRequest(
            "accessToken and refreshToken are both required".to_string(),
        ));
    }
    let pair = TokenPair::new(
        AccessToken::new(body.access_token),
        RefreshToken::new(body.refresh_token),
    );
    let record = state.service.set_tokens_and_persist(pair).await?;
    Ok(Json(record))
}

/// POST /amocrm/oauth -> stores client identity and exchanges the authorization key.
pub async fn oauth(
    _auth: RequireAdminKey,
    State(state): State<BridgeState>,
    Json(body): Json<OauthBody>,
) -> Result<Json<TokenPair>, CrmError> {
    {
        let mut holder = state.service.credentials().write().await;
        holder.set_client_id(body.client_id);
        holder.set_client_secret(body.client_secret);
        holder.set_authorization_key(body.authorization_key);
        if let Some(uri) = body.redirect_uri.filter(|u| !u.is_empty()) {
            holder.set_redirect_uri(uri);
        }
    }
    info!("client identity updated; exchanging authorization key");
    let pair = state.service.authenticate_and_persist().await?;
    Ok(Json(pair))
}

/// POST /amocrm/reissue-tokens
pub async fn reissue_tokens(
    _auth: RequireAdminKey,
    State(state): State<BridgeState>,
) -> Result<Json<TokenPair>, CrmError> {
    let pair = state.service.refresh_and_persist().await?;
    Ok(Json(pair))
}

/// GET /amocrm/diagnostics -> stored record next to the in-memory credentials.
pub async fn diagnostics(
    _auth: RequireAdminKey,
    State(state): State<BridgeState>,
) -> Result<Json<Diagnostics>, CrmError> {
    let stored = state.service.stored_record().await?;
    let credentials = state.service.credential_snapshot().await;
    Ok(Json(Diagnostics {
        stored,
        credentials,
    }))
}
