use axum::extract::{Path, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{blocking, created, ok, parse_id};
use crate::auth::Principal;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateTokenBody {
    pub name: String,
}

/// GET /api/v1/projects/{id}/mcp-tokens: hashes are never returned.
pub async fn list_tokens(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_approver()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.tokens(id)).await?;
    Ok(ok(all))
}

/// POST /api/v1/projects/{id}/mcp-tokens: the raw token appears only in
/// this response.
pub async fn create_token(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<CreateTokenBody>,
) -> Result<Response, AppError> {
    who.require_approver()?;
    let project_id = parse_id(&id)?;
    let service = app.service.clone();
    let (summary, raw) = blocking(move || service.create_token(project_id, &body.name, who.actor())).await?;
    tracing::info!(project_id = %project_id, token_id = %summary.id, "MCP token issued");
    Ok(created(json!({ "token": summary, "raw": raw })))
}

/// DELETE /api/v1/mcp-tokens/{id}: revoke.
pub async fn revoke_token(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_approver()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let summary = blocking(move || service.revoke_token(id, who.actor())).await?;
    Ok(ok(summary))
}
