use crate::amocrm::credentials::{CredentialHolder, TokenPair};
use crate::error::{CrmError, IsRetryable};
use backon::{ExponentialBuilder, Retryable};
use oauth2::{AccessToken, RefreshToken};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, warn};

pub(super) const TOKEN_PATH: &str = "/oauth2/access_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(super) enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

/// Body of a token endpoint call. Built from a holder snapshot so no lock
/// is held while the request is in flight.
#[derive(Serialize)]
pub(super) struct TokenRequest {
    client_id: String,
    client_secret: String,
    grant_type: GrantType,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    redirect_uri: String,
}

impl TokenRequest {
    pub(super) fn authorization_code(holder: &CredentialHolder) -> Result<Self, CrmError> {
        let code = holder
            .authorization_key()
            .ok_or(CrmError::MissingCredential("authorization_key"))?;
        let mut request = Self::base(holder, GrantType::AuthorizationCode)?;
        request.code = Some(code.secret().clone());
        Ok(request)
    }

    pub(super) fn refresh(holder: &CredentialHolder) -> Result<Self, CrmError> {
        let refresh = holder.refresh_token().ok_or(CrmError::NotAuthenticated)?;
        let mut request = Self::base(holder, GrantType::RefreshToken)?;
        request.refresh_token = Some(refresh.secret().clone());
        Ok(request)
    }

    fn base(holder: &CredentialHolder, grant_type: GrantType) -> Result<Self, CrmError> {
        Ok(Self {
            client_id: holder
                .client_id()
                .ok_or(CrmError::MissingCredential("client_id"))?
                .as_str()
                .to_owned(),
            client_secret: holder
                .client_secret()
                .ok_or(CrmError::MissingCredential("client_secret"))?
                .secret()
                .clone(),
            grant_type,
            code: None,
            refresh_token: None,
            redirect_uri: holder
                .redirect_uri()
                .ok_or(CrmError::MissingCredential("redirect_uri"))?
                .to_owned(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Stateless amoCRM token endpoint.
pub(super) struct CrmOauthEndpoints;

impl CrmOauthEndpoints {
    /// POST `request` to the token endpoint and parse the returned pair.
    ///
    /// Only connection failures are retried by `retry_policy`; a sent
    /// refresh token may already be consumed.
    pub(super) async fn request_tokens(
        http: &reqwest::Client,
        token_url: &str,
        request: &TokenRequest,
        retry_policy: ExponentialBuilder,
    ) -> Result<TokenPair, CrmError> {
        let (status, body) = (|| async {
            let resp = http.post(token_url).json(request).send().await?;
            let status = resp.status();
            if status.is_server_error() {
                return Err(CrmError::UpstreamStatus(status));
            }
            let body = resp.text().await?;
            Ok::<_, CrmError>((status, body))
        })
        .retry(retry_policy)
        .when(|e: &CrmError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("Token request retrying after error {}, sleeping {:?}", err, dur);
        })
        .await
        .inspect_err(|e| {
            error!(
                grant_type = ?request.grant_type,
                client_id = %request.client_id,
                redirect_uri = %request.redirect_uri,
                error = %e,
                "token request failed"
            );
        })?;

        parse_token_response(status, &body).inspect_err(|e| {
            error!(
                %status,
                body = %body,
                grant_type = ?request.grant_type,
                client_id = %request.client_id,
                redirect_uri = %request.redirect_uri,
                error = %e,
                "failed to acquire tokens"
            );
        })
    }
}

fn parse_token_response(status: StatusCode, body: &str) -> Result<TokenPair, CrmError> {
    let data: TokenResponse = serde_json::from_str(body)?;
    let access = data
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(CrmError::TokenRejected {
            status,
            field: "access_token",
        })?;
    let refresh = data
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or(CrmError::TokenRejected {
            status,
            field: "refresh_token",
        })?;
    Ok(TokenPair::new(
        AccessToken::new(access),
        RefreshToken::new(refresh),
    ))
}
