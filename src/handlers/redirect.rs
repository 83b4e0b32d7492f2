use crate::{models::Visit, AppState};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// GET /:code
///
/// Resolves through the link service, which checks the in-memory cache before
/// the store and queues the click for the background worker, then redirects.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Response {
    let visit = Visit {
        referer: header_value(&headers, "referer"),
        user_agent: header_value(&headers, "user-agent"),
    };

    match state.service.resolve_link(&code, visit).await {
        Ok(original_url) => redirect_to(&original_url),
        Err(e) => e.into_response(),
    }
}

/// GET /
/// Redirect root visitors to the configured ROOT_REDIRECT_URL.
pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    redirect_to(&state.config.root_redirect_url)
}

/// 303 to `target`. A target that can't be a header value is answered with a
/// 500 instead of panicking inside the response builder.
fn redirect_to(target: &str) -> Response {
    match HeaderValue::try_from(target) {
        Ok(location) => (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response(),
        Err(e) => {
            tracing::error!("Redirect target {:?} is not a valid header value: {}", target, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "invalid_target", "message": "Internal error" })),
            )
                .into_response()
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
