use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use llm_client::ScriptedClient;
use specforge_core::config::ServerConfig;
use specforge_core::types::Role;
use specforge_core::Store;
use specforge_server::auth::{sign, Audience, Claims};
use specforge_server::{build_mcp_router, build_router, AppState};

const SECRET: &str = "integration-secret";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> ServerConfig {
    ServerConfig {
        jwt_secret: SECRET.into(),
        jwt_issuer: Some("specforge".into()),
        jwt_audience: Some("specforge-api".into()),
        mcp_token: Some("dev-mcp-token".into()),
        ..Default::default()
    }
}

fn state(dir: &TempDir) -> AppState {
    let store = Store::open(&dir.path().join("sf.redb")).unwrap();
    AppState::new(store, config())
}

fn token(role: Role) -> String {
    sign(
        SECRET,
        &Claims {
            sub: Uuid::new_v4(),
            workspace: None,
            role,
            iss: Some("specforge".into()),
            aud: Some(Audience::One("specforge-api".into())),
            exp: chrono::Utc::now().timestamp() + 600,
        },
    )
    .unwrap()
}

/// Send a request via `oneshot` and return (status, headers, raw body).
async fn send_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut req = axum::http::Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        req = req.header("authorization", format!("Bearer {t}"));
    }
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            axum::body::Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => axum::body::Body::empty(),
    };
    let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, bytes.to_vec())
}

/// Send a request and parse the JSON envelope.
async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, _, bytes) = send_raw(app, method, uri, bearer, body).await;
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Workspace + project, returning the project id.
async fn seed_project(app: &axum::Router, bearer: &str, settings: Value) -> String {
    let (status, ws) = send(app, "POST", "/api/v1/workspaces", Some(bearer), Some(json!({"name": "acme"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let ws_id = ws["data"]["id"].as_str().unwrap().to_string();
    let (status, project) = send(
        app,
        "POST",
        &format!("/api/v1/workspaces/{ws_id}/projects"),
        Some(bearer),
        Some(json!({"name": "shop", "settings": settings})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    project["data"]["id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// Auth and envelopes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_token_is_auth_failed() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let (status, body) = send(&app, "GET", "/api/v1/workspaces", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "AUTH_FAILED");
}

#[tokio::test]
async fn reviewer_cannot_create() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/workspaces",
        Some(&token(Role::Reviewer)),
        Some(json!({"name": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn malformed_id_and_missing_entity() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let t = token(Role::Engineer);

    let (status, body) = send(&app, "GET", "/api/v1/projects/not-a-uuid", Some(&t), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ID");

    let uri = format!("/api/v1/projects/{}", Uuid::new_v4());
    let (status, body) = send(&app, "GET", &uri, Some(&t), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn invalid_body_is_invalid_request() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/workspaces",
        Some(&token(Role::Owner)),
        Some(json!({"nom": "typo"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn websocket_without_token_is_refused() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let (status, _) = send(&app, "GET", "/api/v1/ws", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Roadmap, governance and audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn governance_rejection_surfaces_as_internal_error() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let t = token(Role::Engineer);
    let project_id = seed_project(&app, &t, json!({})).await;

    let (status, item) = send(
        &app,
        "POST",
        &format!("/api/v1/projects/{project_id}/roadmap-items"),
        Some(&t),
        Some(json!({"kind": "TASK", "title": "Empty"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let item_id = item["data"]["id"].as_str().unwrap().to_string();

    send(
        &app,
        "POST",
        &format!("/api/v1/roadmap-items/{item_id}/requirements"),
        Some(&t),
        Some(json!({"title": "vague", "testable": false})),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/roadmap-items/{item_id}/transition"),
        Some(&t),
        Some(json!({"status": "COMPLETE"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("governance check failed"));

    let (_, gov) = send(&app, "GET", &format!("/api/v1/roadmap-items/{item_id}/governance"), Some(&t), None).await;
    assert_eq!(gov["data"]["can_deploy"]["allowed"], false);
}

#[tokio::test]
async fn audit_log_is_paginated() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let t = token(Role::Engineer);
    let project_id = seed_project(&app, &t, json!({})).await;
    for title in ["a", "b", "c"] {
        send(
            &app,
            "POST",
            &format!("/api/v1/projects/{project_id}/roadmap-items"),
            Some(&t),
            Some(json!({"kind": "TASK", "title": title})),
        )
        .await;
    }

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/v1/projects/{project_id}/audit-logs?page=1&pageSize=2"),
        Some(&t),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["pageSize"], 2);
    assert!(body["meta"]["total"].as_u64().unwrap() >= 3);
}

#[tokio::test]
async fn drift_compare_classifies_removed_required_field() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let baseline = json!({
        "type": "object",
        "properties": {"id": {"type": "string"}, "email": {"type": "string"}},
        "required": ["id", "email"]
    });
    let proposed = json!({
        "type": "object",
        "properties": {"id": {"type": "string"}},
        "required": ["id"]
    });
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/drift/compare",
        Some(&token(Role::Engineer)),
        Some(json!({"baseline": baseline, "proposed": proposed})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["blocked"], true);
    let types: Vec<&str> = body["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"REQUIRED_FIELD_REMOVED"));
}

#[tokio::test]
async fn export_zip_has_attachment_headers() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let t = token(Role::Engineer);
    let project_id = seed_project(&app, &t, json!({})).await;
    let (_, item) = send(
        &app,
        "POST",
        &format!("/api/v1/projects/{project_id}/roadmap-items"),
        Some(&t),
        Some(json!({"kind": "FEATURE", "title": "Checkout"})),
    )
    .await;
    let item_id = item["data"]["id"].as_str().unwrap().to_string();

    let (status, headers, bytes) = send_raw(
        &app,
        "GET",
        &format!("/api/v1/roadmap-items/{item_id}/export?format=zip"),
        Some(&t),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/zip");
    assert!(headers["content-disposition"].to_str().unwrap().starts_with("attachment"));
    assert_eq!(&bytes[..2], b"PK");

    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/v1/roadmap-items/{item_id}/export?format=pdf"),
        Some(&t),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// LLM settings and refinement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn llm_settings_mask_the_key() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let t = token(Role::Owner);
    let (_, ws) = send(&app, "POST", "/api/v1/workspaces", Some(&t), Some(json!({"name": "w"}))).await;
    let ws_id = ws["data"]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/workspaces/{ws_id}/settings/llm");

    let (status, body) = send(
        &app,
        "PUT",
        &uri,
        Some(&t),
        Some(json!({"provider": "openai", "model": "gpt-4o-mini", "api_key": "sk-secret"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["data"]["api_key"], "sk-secret");

    let (_, body) = send(&app, "GET", &uri, Some(&t), None).await;
    assert_eq!(body["data"]["model"], "gpt-4o-mini");
    assert_ne!(body["data"]["api_key"], "sk-secret");
}

#[tokio::test]
async fn refinement_streams_events_until_done() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedClient::new([
        "Here is the contract:\n```json\n{\"name\": \"login\", \"version\": \"1.0.0\"}\n```",
    ]));
    let app = build_router(state(&dir).with_llm(llm));
    let t = token(Role::Engineer);
    let project_id = seed_project(&app, &t, json!({"self_critique": false})).await;

    let (status, started) = send(
        &app,
        "POST",
        &format!("/api/v1/projects/{project_id}/refinement"),
        Some(&t),
        Some(json!({"target_type": "contract", "prompt": "login endpoint", "max_iterations": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(started["data"]["status"], "IN_PROGRESS");
    let session_id = started["data"]["id"].as_str().unwrap().to_string();

    let (status, headers, bytes) = send_raw(
        &app,
        "GET",
        &format!("/api/v1/refinement/{session_id}/events"),
        Some(&t),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/event-stream"));
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("\"ITERATION_START\""));
    assert!(text.contains("\"SUCCESS\""));
    assert!(text.trim_end().ends_with("event: done\ndata: {}"));

    let (_, session) = send(&app, "GET", &format!("/api/v1/refinement/{session_id}"), Some(&t), None).await;
    assert_eq!(session["data"]["status"], "VALIDATED");
    assert_eq!(session["data"]["result"]["name"], "login");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/refinement/{session_id}/approve"),
        Some(&token(Role::Reviewer)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refinement_without_provider_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = build_router(state(&dir));
    let t = token(Role::Engineer);
    let project_id = seed_project(&app, &t, json!({})).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/projects/{project_id}/refinement"),
        Some(&t),
        Some(json!({"target_type": "contract", "prompt": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("no LLM provider"));
}

// ---------------------------------------------------------------------------
// MCP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mcp_lists_tools_with_static_token() {
    let dir = TempDir::new().unwrap();
    let app = build_mcp_router(state(&dir));
    let (status, body) = send(
        &app,
        "POST",
        "/mcp",
        Some("dev-mcp-token"),
        Some(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 9);
}

#[tokio::test]
async fn mcp_notification_gets_no_body() {
    let dir = TempDir::new().unwrap();
    let app = build_mcp_router(state(&dir));
    let (status, _, bytes) = send_raw(
        &app,
        "POST",
        "/mcp",
        Some("dev-mcp-token"),
        Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn mcp_parse_error_and_auth_error() {
    let dir = TempDir::new().unwrap();
    let app = build_mcp_router(state(&dir));

    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], -32700);

    let (_, body) = send(
        &app,
        "POST",
        "/mcp",
        None,
        Some(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})),
    )
    .await;
    assert_eq!(body["error"]["code"], -32000);
}
