use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use specforge_core::llm_settings::LlmConfigInput;

use super::refinement::done_frame;
use super::{blocking, ok, parse_id};
use crate::auth::Principal;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;

const HEARTBEAT: Duration = Duration::from_millis(100);
const WARMUP_PROMPT: &str = "Reply with the single word: ready";

/// GET /api/v1/workspaces/{id}/settings/llm: API key masked.
pub async fn get_llm_settings(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let cfg = blocking(move || service.llm_config(id)).await?;
    Ok(ok(cfg))
}

/// PUT /api/v1/workspaces/{id}/settings/llm
pub async fn put_llm_settings(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<LlmConfigInput>,
) -> Result<Json<Value>, AppError> {
    who.require_approver()?;
    let id = parse_id(&id)?;
    let service = app.service.clone();
    let cfg = blocking(move || service.put_llm_config(id, body, who.actor())).await?;
    tracing::info!(workspace_id = %id, provider = ?cfg.provider, model = %cfg.model, "LLM settings updated");
    Ok(ok(cfg))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupQuery {
    #[serde(default)]
    pub workspace_id: Option<String>,
}

fn frame(value: Value) -> Event {
    Event::default().data(value.to_string())
}

/// GET /api/v1/settings/llm/warmup?workspaceId=: issue a ping generation
/// and stream heartbeats until it answers.
pub async fn llm_warmup(
    State(app): State<AppState>,
    Extension(who): Extension<Principal>,
    Query(q): Query<WarmupQuery>,
) -> Result<Response, AppError> {
    let workspace_id: Uuid = match q.workspace_id.as_deref() {
        Some(raw) => parse_id(raw)?,
        None => who
            .workspace_id
            .ok_or_else(|| AppError::bad_request("workspaceId is required"))?,
    };
    let llm = app.llm_for_workspace(workspace_id).await?;

    let (tx, rx) = mpsc::channel::<Event>(16);
    tokio::spawn(async move {
        let started = std::time::Instant::now();
        let mut ticker = tokio::time::interval(HEARTBEAT);
        let call = llm.generate(WARMUP_PROMPT);
        tokio::pin!(call);

        let outcome = loop {
            tokio::select! {
                res = &mut call => break res,
                _ = ticker.tick() => {
                    let beat = json!({ "type": "heartbeat", "elapsedMs": started.elapsed().as_millis() as u64 });
                    if tx.send(frame(beat)).await.is_err() {
                        tracing::debug!(workspace_id = %workspace_id, "warmup subscriber went away");
                        return;
                    }
                }
            }
        };

        let elapsed = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(text) => json!({ "type": "result", "ok": true, "elapsedMs": elapsed, "response": text }),
            Err(e) => {
                tracing::warn!(workspace_id = %workspace_id, "LLM warmup failed: {e}");
                json!({ "type": "result", "ok": false, "elapsedMs": elapsed, "error": e.to_string() })
            }
        };
        let _ = tx.send(frame(result)).await;
        let _ = tx.send(done_frame()).await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}
