use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde_json::Value;

use specforge_core::page::PageRequest;

use super::{blocking, ok, paged, parse_id};
use crate::auth::Principal;
use crate::error::AppError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

/// POST /api/v1/projects/{id}/alignment: run the checker now.
pub async fn trigger_alignment(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let report = blocking(move || service.trigger_alignment(id)).await?;
    tracing::info!(project_id = %id, score = report.score, "alignment run");
    Ok(ok(report))
}

/// GET /api/v1/projects/{id}/alignment: latest report, or null.
pub async fn latest_alignment(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let report = blocking(move || service.latest_alignment(id)).await?;
    Ok(ok(report))
}

/// GET /api/v1/projects/{id}/alignment/reports?page=&pageSize=
pub async fn alignment_reports(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let reports = blocking(move || service.alignment_reports(id, page)).await?;
    Ok(paged(reports))
}

// ---------------------------------------------------------------------------
// Feature intelligence and governance
// ---------------------------------------------------------------------------

/// GET /api/v1/roadmap-items/{id}/intelligence
pub async fn get_intelligence(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let intel = blocking(move || service.feature_intelligence(id)).await?;
    Ok(ok(intel))
}

/// POST /api/v1/roadmap-items/{id}/intelligence/recompute
pub async fn recompute_intelligence(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let intel = blocking(move || service.recompute_intelligence(id)).await?;
    Ok(ok(intel))
}

/// GET /api/v1/roadmap-items/{id}/governance
pub async fn get_governance(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let view = blocking(move || service.governance(id)).await?;
    Ok(ok(view))
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// GET /api/v1/projects/{id}/audit-logs?page=&pageSize=
pub async fn audit_logs(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let records = blocking(move || service.audit_log(id, page)).await?;
    Ok(paged(records))
}
