use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use specforge_core::model::{
    NewDependency, NewProposal, NewRequirement, NewRoadmapItem, NewValidationRule, RoadmapItemPatch,
};
use specforge_core::types::RoadmapStatus;

use super::{blocking, created, ok, parse_id};
use crate::auth::Principal;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Roadmap items
// ---------------------------------------------------------------------------

/// GET /api/v1/projects/{id}/roadmap-items
pub async fn list_items(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let items = blocking(move || service.items(id)).await?;
    Ok(ok(items))
}

/// POST /api/v1/projects/{id}/roadmap-items
pub async fn create_item(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewRoadmapItem>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let project_id = parse_id(&id)?;
    let service = app.service.clone();
    let item = blocking(move || service.create_item(project_id, body, who.actor())).await?;
    Ok(created(item))
}

/// GET /api/v1/roadmap-items/{id}
pub async fn get_item(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let item = blocking(move || service.item(id)).await?;
    Ok(ok(item))
}

/// PATCH /api/v1/roadmap-items/{id}
pub async fn update_item(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<RoadmapItemPatch>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let item = blocking(move || service.update_item(id, patch, who.actor())).await?;
    Ok(ok(item))
}

#[derive(Deserialize)]
pub struct TransitionBody {
    pub status: RoadmapStatus,
}

/// POST /api/v1/roadmap-items/{id}/transition: status change through the
/// governance gate.
pub async fn transition_item(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<TransitionBody>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let item = blocking(move || service.transition_item(id, body.status, who.actor())).await?;
    tracing::info!(roadmap_item_id = %id, status = %item.status, "roadmap item transitioned");
    Ok(ok(item))
}

/// DELETE /api/v1/roadmap-items/{id}
pub async fn delete_item(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    blocking(move || service.delete_item(id, who.actor())).await?;
    Ok(ok(json!({ "deleted": id })))
}

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

/// GET /api/v1/roadmap-items/{id}/requirements
pub async fn list_requirements(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.requirements(id)).await?;
    Ok(ok(all))
}

/// POST /api/v1/roadmap-items/{id}/requirements
pub async fn create_requirement(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewRequirement>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let item_id = parse_id(&id)?;
    let service = app.service.clone();
    let req = blocking(move || service.create_requirement(item_id, body, who.actor())).await?;
    Ok(created(req))
}

/// DELETE /api/v1/requirements/{id}
pub async fn delete_requirement(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    blocking(move || service.delete_requirement(id, who.actor())).await?;
    Ok(ok(json!({ "deleted": id })))
}

// ---------------------------------------------------------------------------
// Validation rules
// ---------------------------------------------------------------------------

/// GET /api/v1/projects/{id}/validation-rules
pub async fn list_rules(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.rules(id)).await?;
    Ok(ok(all))
}

/// POST /api/v1/projects/{id}/validation-rules
pub async fn create_rule(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewValidationRule>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let project_id = parse_id(&id)?;
    let service = app.service.clone();
    let rule = blocking(move || service.create_rule(project_id, body, who.actor())).await?;
    Ok(created(rule))
}

/// DELETE /api/v1/validation-rules/{id}
pub async fn delete_rule(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    blocking(move || service.delete_rule(id, who.actor())).await?;
    Ok(ok(json!({ "deleted": id })))
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// GET /api/v1/projects/{id}/roadmap-dependencies
pub async fn list_dependencies(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.dependencies(id)).await?;
    Ok(ok(all))
}

/// POST /api/v1/projects/{id}/roadmap-dependencies
pub async fn create_dependency(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewDependency>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let project_id = parse_id(&id)?;
    let service = app.service.clone();
    let dep = blocking(move || service.create_dependency(project_id, body, who.actor())).await?;
    Ok(created(dep))
}

/// DELETE /api/v1/roadmap-dependencies/{id}
pub async fn delete_dependency(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    blocking(move || service.delete_dependency(id, who.actor())).await?;
    Ok(ok(json!({ "deleted": id })))
}

// ---------------------------------------------------------------------------
// Version snapshots
// ---------------------------------------------------------------------------

/// GET /api/v1/roadmap-items/{id}/snapshots
pub async fn list_snapshots(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.version_snapshots(id)).await?;
    Ok(ok(all))
}

/// POST /api/v1/roadmap-items/{id}/snapshots
pub async fn create_snapshot(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let item_id = parse_id(&id)?;
    let service = app.service.clone();
    let snap = blocking(move || service.create_version_snapshot(item_id, who.actor())).await?;
    Ok(created(snap))
}

/// GET /api/v1/snapshots/{id}
pub async fn get_snapshot(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let snap = blocking(move || service.version_snapshot(id)).await?;
    Ok(ok(snap))
}

#[derive(Deserialize)]
pub struct CompareQuery {
    pub old: String,
    pub new: String,
}

/// GET /api/v1/snapshots/compare?old=&new=
pub async fn compare_snapshots(
    State(app): State<AppState>,
    Query(q): Query<CompareQuery>,
) -> Result<Json<Value>, AppError> {
    let old = parse_id(&q.old)?;
    let new = parse_id(&q.new)?;
    let service = app.service.clone();
    let diff = blocking(move || service.compare_version_snapshots(old, new)).await?;
    Ok(ok(diff))
}

// ---------------------------------------------------------------------------
// AI proposals
// ---------------------------------------------------------------------------

/// GET /api/v1/roadmap-items/{id}/ai-proposals
pub async fn list_proposals(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.proposals(id)).await?;
    Ok(ok(all))
}

/// POST /api/v1/roadmap-items/{id}/ai-proposals
pub async fn create_proposal(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewProposal>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let item_id = parse_id(&id)?;
    let service = app.service.clone();
    let proposal = blocking(move || service.create_proposal(item_id, body, who.actor())).await?;
    Ok(created(proposal))
}

/// POST /api/v1/ai-proposals/{id}/approve
pub async fn approve_proposal(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_approver()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let proposal = blocking(move || service.approve_proposal(id, who.actor())).await?;
    Ok(ok(proposal))
}

/// POST /api/v1/ai-proposals/{id}/reject
pub async fn reject_proposal(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_approver()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let proposal = blocking(move || service.reject_proposal(id, who.actor())).await?;
    Ok(ok(proposal))
}
