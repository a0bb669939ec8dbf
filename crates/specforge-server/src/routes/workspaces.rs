use axum::extract::{Path, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use specforge_core::model::{NewProject, ProjectPatch};

use super::{blocking, created, ok, parse_id};
use crate::auth::Principal;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateWorkspaceBody {
    pub name: String,
}

/// GET /api/v1/workspaces
pub async fn list_workspaces(State(app): State<AppState>) -> Result<Json<Value>, AppError> {
    let service = app.service.clone();
    let all = blocking(move || service.workspaces()).await?;
    Ok(ok(all))
}

/// POST /api/v1/workspaces
pub async fn create_workspace(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    ApiJson(body): ApiJson<CreateWorkspaceBody>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let service = app.service.clone();
    let ws = blocking(move || service.create_workspace(&body.name, who.actor())).await?;
    tracing::info!(workspace_id = %ws.id, "workspace created");
    Ok(created(ws))
}

/// GET /api/v1/workspaces/{id}
pub async fn get_workspace(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let ws = blocking(move || service.workspace(id)).await?;
    Ok(ok(ws))
}

/// DELETE /api/v1/workspaces/{id}: removes its projects as well.
pub async fn delete_workspace(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_approver()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    blocking(move || service.delete_workspace(id, who.actor())).await?;
    Ok(ok(json!({ "deleted": id })))
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateProjectBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub settings: Option<Value>,
}

/// GET /api/v1/workspaces/{id}/projects
pub async fn list_projects(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let projects = blocking(move || service.projects(id)).await?;
    Ok(ok(projects))
}

/// POST /api/v1/workspaces/{id}/projects
pub async fn create_project(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<CreateProjectBody>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let workspace_id = parse_id(&id)?;
    let service = app.service.clone();
    let project = blocking(move || {
        service.create_project(
            NewProject {
                workspace_id,
                name: body.name,
                description: body.description,
                settings: body.settings,
            },
            who.actor(),
        )
    })
    .await?;
    Ok(created(project))
}

/// GET /api/v1/projects/{id}
pub async fn get_project(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let project = blocking(move || service.project(id)).await?;
    Ok(ok(project))
}

/// PATCH /api/v1/projects/{id}
pub async fn update_project(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<ProjectPatch>,
) -> Result<Json<Value>, AppError> {
    who.require_write()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let project = blocking(move || service.update_project(id, patch, who.actor())).await?;
    Ok(ok(project))
}

/// DELETE /api/v1/projects/{id}
pub async fn delete_project(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_approver()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    blocking(move || service.delete_project(id, who.actor())).await?;
    Ok(ok(json!({ "deleted": id })))
}
