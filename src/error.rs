use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum CrmError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Credential store did not answer within {0:?}")]
    StoreTimeout(std::time::Duration),

    #[error("Missing credential field `{0}`")]
    MissingCredential(&'static str),

    #[error("No token pair available; authenticate first")]
    NotAuthenticated,

    #[error("Token endpoint answered {status} without `{field}`")]
    TokenRejected {
        status: StatusCode,
        field: &'static str,
    },

    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid contact field mapping: {0}")]
    FieldMapping(String),
}

impl From<figment::Error> for CrmError {
    fn from(e: figment::Error) -> Self {
        CrmError::Config(Box::new(e))
    }
}

/// Marks failures worth another attempt. Only requests that never reached
/// the server qualify: a refresh token is single-use, so a timed-out or
/// 5xx exchange may already have consumed it.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for CrmError {
    fn is_retryable(&self) -> bool {
        match self {
            CrmError::Reqwest(e) => e.is_connect(),
            _ => false,
        }
    }
}

impl CrmError {
    /// Whether the failure means the CRM refused our credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            CrmError::NotAuthenticated
                | CrmError::MissingCredential(_)
                | CrmError::TokenRejected { .. }
        )
    }
}

impl IntoResponse for CrmError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            e if e.is_auth_failure() => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody {
                    code: "UNAUTHORIZED".to_string(),
                    message: "Authentication error.".to_string(),
                },
            ),
            CrmError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody {
                    code: "BAD_REQUEST".to_string(),
                    message: "Malformed request.".to_string(),
                },
            ),
            _ => return internal_error_response(),
        };
        (status, Json(ApiErrorResponse { error: body })).into_response()
    }
}

/// Generic 500 that reveals nothing about the CRM.
pub fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiErrorResponse {
            error: ApiErrorBody {
                code: "INTERNAL_ERROR".to_string(),
                message: "An internal server error occurred.".to_string(),
            },
        }),
    )
        .into_response()
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
