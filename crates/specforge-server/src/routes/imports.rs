use axum::extract::{Path, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde_json::Value;

use super::{blocking, created, ok, parse_id};
use crate::auth::Principal;
use crate::error::AppError;
use crate::state::AppState;

/// POST /api/v1/projects/{id}/import-sessions: open an import dialogue
/// from the HTTP side; agents normally do this over MCP.
pub async fn init_import(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let project_id = parse_id(&id)?;
    let service = app.service.clone();
    let init = blocking(move || service.init_import(project_id, who.actor())).await?;
    Ok(created(init))
}

/// GET /api/v1/import-sessions/{id}
pub async fn get_import_session(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let session = blocking(move || service.import_session(id)).await?;
    Ok(ok(session))
}

/// GET /api/v1/import-sessions/{id}/catalogue: merged submissions.
pub async fn get_import_catalogue(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let catalogue = blocking(move || service.import_catalogue(id)).await?;
    Ok(ok(catalogue))
}

/// POST /api/v1/import-sessions/{id}/bootstrap: turn a locked catalogue
/// into roadmap items and contracts.
pub async fn bootstrap(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let result = blocking(move || service.bootstrap(id, who.actor())).await?;
    tracing::info!(
        session_id = %id,
        items = result.items_created,
        contracts = result.contracts_created,
        "bootstrap ingest complete"
    );
    Ok(ok(result))
}
