use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use specforge_core::drift::{self, DriftPolicy};
use specforge_core::export::ExportFormat;
use specforge_core::model::{ContractPatch, NewContract, NewVariable, VariablePatch};

use super::{blocking, created, ok, parse_id};
use crate::auth::Principal;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// GET /api/v1/roadmap-items/{id}/contracts
pub async fn list_contracts(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.contracts(id)).await?;
    Ok(ok(all))
}

/// POST /api/v1/roadmap-items/{id}/contracts: gated by `canUpdateContract`.
pub async fn create_contract(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewContract>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let item_id = parse_id(&id)?;
    let service = app.service.clone();
    let contract = blocking(move || service.create_contract(item_id, body, who.actor())).await?;
    Ok(created(contract))
}

/// GET /api/v1/contracts/{id}
pub async fn get_contract(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let contract = blocking(move || service.contract(id)).await?;
    Ok(ok(contract))
}

/// PATCH /api/v1/contracts/{id}
pub async fn update_contract(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<ContractPatch>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let contract = blocking(move || service.update_contract(id, patch, who.actor())).await?;
    Ok(ok(contract))
}

/// DELETE /api/v1/contracts/{id}
pub async fn delete_contract(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    blocking(move || service.delete_contract(id, who.actor())).await?;
    Ok(ok(json!({ "deleted": id })))
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// GET /api/v1/contracts/{id}/variables
pub async fn list_variables(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.variables(id)).await?;
    Ok(ok(all))
}

/// POST /api/v1/contracts/{id}/variables
pub async fn create_variable(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewVariable>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let contract_id = parse_id(&id)?;
    let service = app.service.clone();
    let var = blocking(move || service.create_variable(contract_id, body, who.actor())).await?;
    Ok(created(var))
}

/// GET /api/v1/variables/{id}
pub async fn get_variable(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let var = blocking(move || service.variable(id)).await?;
    Ok(ok(var))
}

/// PATCH /api/v1/variables/{id}
pub async fn update_variable(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<VariablePatch>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let var = blocking(move || service.update_variable(id, patch, who.actor())).await?;
    Ok(ok(var))
}

/// DELETE /api/v1/variables/{id}
pub async fn delete_variable(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    blocking(move || service.delete_variable(id, who.actor())).await?;
    Ok(ok(json!({ "deleted": id })))
}

/// GET /api/v1/variables/{id}/lineage
pub async fn variable_lineage(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let lineage = blocking(move || service.variable_lineage(id)).await?;
    Ok(ok(lineage))
}

// ---------------------------------------------------------------------------
// Drift
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct DriftCompareBody {
    pub baseline: Value,
    pub proposed: Value,
    #[serde(default)]
    pub policy: Option<DriftPolicy>,
}

/// POST /api/v1/drift/compare: pure comparison, nothing is stored.
pub async fn compare_drift(ApiJson(body): ApiJson<DriftCompareBody>) -> Result<Json<Value>, AppError> {
    let policy = body.policy.unwrap_or_default();
    let report = drift::compare(&body.baseline, &body.proposed, &policy);
    Ok(ok(report))
}

#[derive(Deserialize)]
pub struct DriftCheckBody {
    #[serde(default)]
    pub policy: Option<DriftPolicy>,
}

/// POST /api/v1/contracts/{id}/drift-check
pub async fn drift_check(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    // An empty body means the default policy.
    let policy = if body.is_empty() {
        DriftPolicy::default()
    } else {
        let parsed: DriftCheckBody = serde_json::from_slice(&body)
            .map_err(|e| AppError::bad_request(format!("invalid body: {e}")))?;
        parsed.policy.unwrap_or_default()
    };
    let service = app.service.clone();
    let check = blocking(move || service.drift_check(id, &policy)).await?;
    Ok(ok(check))
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// GET /api/v1/roadmap-items/{id}/export?format=json|markdown|zip
pub async fn export_item(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let format: ExportFormat = q.format.as_deref().unwrap_or("json").parse()?;
    let service = app.service.clone();
    let out = blocking(move || service.export(id, format)).await?;
    let disposition = format!("attachment; filename=\"{}\"", out.filename);
    Ok((
        [(CONTENT_TYPE, out.content_type.to_string()), (CONTENT_DISPOSITION, disposition)],
        out.bytes,
    )
        .into_response())
}
