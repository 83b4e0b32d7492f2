use axum::{
    extract::rejection::JsonRejection,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure of the persistence layer. Every backend error collapses into this
/// type so the service never has to know which engine is behind the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Request-scoped outcome of the link service. None of these is fatal to the
/// process.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not a valid absolute http(s) URL: {0}")]
    InvalidUrl(String),
    #[error("no free short code found after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },
    #[error("short link not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl LinkError {
    pub fn kind(&self) -> &'static str {
        match self {
            LinkError::InvalidUrl(_) => "invalid_url",
            LinkError::CodeSpaceExhausted { .. } => "code_space_exhausted",
            LinkError::NotFound => "not_found",
            LinkError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LinkError::InvalidUrl(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LinkError::CodeSpaceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            LinkError::NotFound => StatusCode::NOT_FOUND,
            LinkError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Store details go to the log, never to the client.
        let message = match &self {
            LinkError::StoreUnavailable(e) => {
                tracing::error!("Store unavailable: {}", e);
                "Internal error".to_owned()
            }
            other => other.to_string(),
        };
        let body = Json(json!({ "error": self.kind(), "message": message }));

        match self {
            LinkError::CodeSpaceExhausted { .. } => {
                (status, [(header::RETRY_AFTER, "60")], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

/// A request body axum could not turn into the expected JSON, answered in the
/// same `{ error, message }` shape as every other API error.
pub fn bad_request(rejection: JsonRejection) -> Response {
    let status = rejection.status();
    let body = Json(json!({ "error": "bad_request", "message": rejection.body_text() }));
    (status, body).into_response()
}
