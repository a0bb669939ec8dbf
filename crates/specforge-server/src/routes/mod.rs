pub mod contracts;
pub mod imports;
pub mod insight;
pub mod refinement;
pub mod roadmap;
pub mod settings;
pub mod tokens;
pub mod workspaces;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use specforge_core::page::Page;
use specforge_core::SpecError;

use crate::error::AppError;

/// Run synchronous store work off the async executor.
pub async fn blocking<F, T, E>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?
        .map_err(|e| AppError(e.into()))
}

pub fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError(SpecError::InvalidId(raw.to_string()).into()))
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": data }))
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, ok(data)).into_response()
}

pub fn paged<T: Serialize>(page: Page<T>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": page.items, "meta": page.meta }))
}
