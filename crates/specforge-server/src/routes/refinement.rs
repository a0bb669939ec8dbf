use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::stream::{self, BoxStream, StreamExt as _};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use specforge_core::refinement::{NewRefinement, RefinementEvent, RefinementSession};

use super::{blocking, created, ok, parse_id};
use crate::auth::Principal;
use crate::error::{ApiJson, AppError};
use crate::refinement::{run_session, SUBSCRIBER_WAIT};
use crate::state::AppState;

/// POST /api/v1/projects/{id}/refinement: persist the session and start
/// its worker. Events are read from `/refinement/{id}/events`.
pub async fn start_refinement(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewRefinement>,
) -> Result<Response, AppError> {
    who.require_write()?;
    let project_id = parse_id(&id)?;
    let service = app.service.clone();
    let project = blocking(move || service.project(project_id)).await?;
    let llm = app.llm_for_workspace(project.workspace_id).await?;

    let session = RefinementSession::new(project_id, body, who.actor())?;
    let service = app.service.clone();
    let record = session.clone();
    blocking(move || service.save_refinement(&record)).await?;

    let tx = app.refinements.open(session.id);
    let service = app.service.clone();
    let worker_session = session.clone();
    let self_critique = project.self_critique_enabled();
    let registry = app.refinements.clone();
    let cancel = app.shutdown.child_token();
    app.workers.spawn(async move {
        let done = run_session(service, llm, worker_session, self_critique, tx, cancel).await;
        registry.finish(done.id);
        tracing::info!(session_id = %done.id, status = %done.status, "refinement worker finished");
    });

    tracing::info!(session_id = %session.id, project_id = %project_id, "refinement started");
    Ok(created(session))
}

/// GET /api/v1/projects/{id}/refinement
pub async fn list_refinements(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let all = blocking(move || service.refinements(id)).await?;
    Ok(ok(all))
}

/// GET /api/v1/refinement/{id}
pub async fn get_refinement(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let session = blocking(move || service.refinement(id)).await?;
    Ok(ok(session))
}

/// POST /api/v1/refinement/{id}/approve
pub async fn approve_refinement(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    who.require_approver()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let session = blocking(move || service.approve_refinement(id, who.actor())).await?;
    Ok(ok(session))
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

fn data_frame<T: serde::Serialize>(value: &T) -> Event {
    Event::default().data(serde_json::to_string(value).unwrap_or_else(|_| "{}".into()))
}

pub(crate) fn done_frame() -> Event {
    Event::default().event("done").data("{}")
}

/// Frames of a live queue, ending at the queue's close or the wait ceiling.
fn queue_frames(rx: mpsc::Receiver<RefinementEvent>) -> BoxStream<'static, Result<Event, Infallible>> {
    let deadline = Instant::now() + SUBSCRIBER_WAIT;
    stream::unfold(rx, move |mut rx| async move {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => Some((event, rx)),
            Ok(None) => None,
            Err(_) => {
                tracing::debug!("refinement stream reached its wait ceiling");
                None
            }
        }
    })
    .map(|event| Ok::<_, Infallible>(data_frame(&event)))
    .boxed()
}

/// GET /api/v1/refinement/{id}/events: SSE of the worker's events. The
/// queue has a single consumer; later subscribers get the stored session.
pub async fn refinement_events(State(app): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let body = match app.refinements.take(id) {
        Some(rx) => queue_frames(rx),
        None => {
            let service = app.service.clone();
            let session = blocking(move || service.refinement(id)).await?;
            stream::once(async move { Ok::<_, Infallible>(data_frame(&session)) }).boxed()
        }
    };
    let frames = body.chain(stream::once(async { Ok::<_, Infallible>(done_frame()) }));
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()).into_response())
}
