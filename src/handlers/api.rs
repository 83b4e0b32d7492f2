use crate::{
    auth::AuthUser,
    error::{self, LinkError},
    models::{Analytics, Link},
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Request / response types ───────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    #[serde(alias = "originalUrl")]
    original_url: String,
}

#[derive(Serialize)]
pub struct LinkResponse {
    id: String,
    short_code: String,
    short_url: String,
    original_url: String,
    created_at: DateTime<Utc>,
    click_count: i64,
}

impl LinkResponse {
    fn from_link(base_url: &str, link: Link) -> Self {
        Self {
            short_url: format!("{}/{}", base_url, link.short_code),
            id: link.id,
            short_code: link.short_code,
            original_url: link.original_url,
            created_at: link.created_at,
            click_count: link.click_count,
        }
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────

/// POST /api/links
pub async fn create_link(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateLinkRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return error::bad_request(rejection),
    };

    match state
        .service
        .create_link(&auth.owner_id, &body.original_url)
        .await
    {
        Ok(link) => (
            StatusCode::CREATED,
            Json(LinkResponse::from_link(&state.config.base_url, link)),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/links
pub async fn list_links(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LinkResponse>>, LinkError> {
    let links = state.service.list_links(&auth.owner_id).await?;

    Ok(Json(
        links
            .into_iter()
            .map(|link| LinkResponse::from_link(&state.config.base_url, link))
            .collect(),
    ))
}

/// GET /api/links/:code/analytics
pub async fn analytics(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Analytics>, LinkError> {
    let summary = state.service.link_analytics(&auth.owner_id, &code).await?;
    Ok(Json(summary))
}
