//! MCP over HTTP: JSON-RPC 2.0 requests POSTed to `/mcp`.
//!
//! Every request carries a bearer token: either the configured static
//! fallback (all projects) or a per-project `sf_live_` token.

pub mod tools;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use specforge_core::config::ServerConfig;
use specforge_core::Service;

use crate::state::AppState;
use tools::{McpTool, ToolContext, ToolError};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const AUTH_ERROR: i32 = -32000;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ToolContent {
    r#type: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct ToolCallResult {
    content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Resolve a bearer into a project scope; `None` scope is the static token.
pub fn authenticate(service: &Service, config: &ServerConfig, bearer: Option<&str>) -> Result<Option<Uuid>, String> {
    let token = bearer.filter(|t| !t.is_empty()).ok_or("missing bearer token")?;
    if config.static_mcp_token() == Some(token) {
        return Ok(None);
    }
    service
        .validate_token(token)
        .map(|t| Some(t.project_id))
        .map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Request dispatch (pub for unit tests)
// ---------------------------------------------------------------------------

pub fn handle_request(
    req: &JsonRpcRequest,
    tools: &[Box<dyn McpTool>],
    service: &Service,
    config: &ServerConfig,
    bearer: Option<&str>,
) -> JsonRpcResponse {
    let scope = match authenticate(service, config, bearer) {
        Ok(scope) => scope,
        Err(e) => {
            tracing::debug!(method = %req.method, "mcp auth failed: {e}");
            return JsonRpcResponse::failure(req.id.clone(), AUTH_ERROR, format!("unauthorized: {e}"));
        }
    };

    match req.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            req.id.clone(),
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "specforge",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),

        "notifications/initialized" => JsonRpcResponse::success(req.id.clone(), serde_json::json!({})),

        "tools/list" => {
            let tool_list: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name(),
                        "description": t.description(),
                        "inputSchema": t.schema()
                    })
                })
                .collect();
            JsonRpcResponse::success(req.id.clone(), serde_json::json!({ "tools": tool_list }))
        }

        "tools/call" => {
            let Some(params) = &req.params else {
                return JsonRpcResponse::failure(req.id.clone(), INVALID_PARAMS, "missing params");
            };
            let Some(tool_name) = params["name"].as_str() else {
                return JsonRpcResponse::failure(req.id.clone(), INVALID_PARAMS, "missing tool name in params");
            };
            let args = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));

            let Some(tool) = tools.iter().find(|t| t.name() == tool_name) else {
                return JsonRpcResponse::failure(req.id.clone(), METHOD_NOT_FOUND, format!("tool not found: {tool_name}"));
            };

            let ctx = ToolContext { service, scope };
            let (text, is_error) = match tool.call(args, &ctx) {
                Ok(v) => (
                    serde_json::to_string_pretty(&v).unwrap_or_else(|e| format!("serialization error: {e}")),
                    false,
                ),
                Err(ToolError::Failed(msg)) => (msg, true),
                Err(ToolError::InvalidParams(msg)) => {
                    return JsonRpcResponse::failure(req.id.clone(), INVALID_PARAMS, msg);
                }
                Err(ToolError::Unauthorized(msg)) => {
                    return JsonRpcResponse::failure(req.id.clone(), AUTH_ERROR, msg);
                }
                Err(ToolError::Internal(msg)) => {
                    tracing::error!(tool = tool_name, "mcp tool failed: {msg}");
                    return JsonRpcResponse::failure(req.id.clone(), INTERNAL_ERROR, msg);
                }
            };

            let call_result = ToolCallResult {
                content: vec![ToolContent { r#type: "text", text }],
                is_error,
            };
            JsonRpcResponse::success(
                req.id.clone(),
                serde_json::to_value(&call_result).unwrap_or_else(|e| serde_json::json!({"error": e.to_string()})),
            )
        }

        other => JsonRpcResponse::failure(req.id.clone(), METHOD_NOT_FOUND, format!("method not found: {other}")),
    }
}

// ---------------------------------------------------------------------------
// HTTP endpoint
// ---------------------------------------------------------------------------

fn bearer_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// POST /mcp
pub async fn mcp_endpoint(State(app): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return Json(JsonRpcResponse::failure(None, PARSE_ERROR, format!("parse error: {e}"))).into_response();
        }
    };

    // Notifications have no "id" key and get no body.
    let is_notification = !raw.as_object().is_some_and(|o| o.contains_key("id"));

    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            return Json(JsonRpcResponse::failure(None, INVALID_REQUEST, format!("invalid request: {e}")))
                .into_response();
        }
    };

    let bearer = bearer_of(&headers);
    let service = app.service.clone();
    let config = app.config.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let tools = tools::all_tools();
        handle_request(&request, &tools, &service, &config, bearer.as_deref())
    })
    .await;

    let response = match joined {
        Ok(r) => r,
        Err(e) => JsonRpcResponse::failure(None, INTERNAL_ERROR, format!("task join error: {e}")),
    };
    if is_notification {
        return StatusCode::ACCEPTED.into_response();
    }
    Json(response).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use specforge_core::model::NewProject;
    use specforge_core::notify::NoopNotifier;
    use specforge_core::Store;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        service: Service,
        config: ServerConfig,
        project_id: Uuid,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("sf.redb")).unwrap();
        let service = Service::new(Arc::new(store), Arc::new(NoopNotifier));
        let ws = service.create_workspace("w", None).unwrap();
        let project = service
            .create_project(
                NewProject {
                    workspace_id: ws.id,
                    name: "p".into(),
                    description: String::new(),
                    settings: None,
                },
                None,
            )
            .unwrap();
        let config = ServerConfig {
            mcp_token: Some("dev-token".into()),
            ..Default::default()
        };
        Fixture {
            _dir: dir,
            service,
            config,
            project_id: project.id,
        }
    }

    fn make_req(id: i64, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(Value::Number(id.into())),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn initialize_returns_capabilities() {
        let f = fixture();
        let resp = handle_request(
            &make_req(1, "initialize", Some(json!({}))),
            &tools::all_tools(),
            &f.service,
            &f.config,
            Some("dev-token"),
        );
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(result["serverInfo"]["name"], "specforge");
    }

    #[test]
    fn missing_or_wrong_token_is_auth_error() {
        let f = fixture();
        let tools = tools::all_tools();
        let req = make_req(2, "tools/list", None);
        for bearer in [None, Some("wrong"), Some("sf_live_unknown")] {
            let resp = handle_request(&req, &tools, &f.service, &f.config, bearer);
            assert_eq!(resp.error.unwrap().code, AUTH_ERROR);
        }
    }

    #[test]
    fn static_token_can_be_disabled() {
        let mut f = fixture();
        f.config.allow_static_mcp_token = false;
        let resp = handle_request(
            &make_req(3, "tools/list", None),
            &tools::all_tools(),
            &f.service,
            &f.config,
            Some("dev-token"),
        );
        assert_eq!(resp.error.unwrap().code, AUTH_ERROR);
    }

    #[test]
    fn project_token_lists_tools() {
        let f = fixture();
        let (_, raw) = f.service.create_token(f.project_id, "agent", None).unwrap();
        let resp = handle_request(
            &make_req(4, "tools/list", None),
            &tools::all_tools(),
            &f.service,
            &f.config,
            Some(&raw),
        );
        let list = resp.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(list, 9);
    }

    #[test]
    fn project_token_cannot_reach_other_project() {
        let f = fixture();
        let (_, raw) = f.service.create_token(f.project_id, "agent", None).unwrap();
        let req = make_req(
            5,
            "tools/call",
            Some(json!({ "name": "list_active_snapshots", "arguments": { "project_id": Uuid::new_v4() } })),
        );
        let resp = handle_request(&req, &tools::all_tools(), &f.service, &f.config, Some(&raw));
        assert_eq!(resp.error.unwrap().code, AUTH_ERROR);
    }

    #[test]
    fn unknown_method_and_tool_are_not_found() {
        let f = fixture();
        let tools = tools::all_tools();
        let resp = handle_request(&make_req(6, "bogus", None), &tools, &f.service, &f.config, Some("dev-token"));
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);

        let req = make_req(7, "tools/call", Some(json!({ "name": "nope", "arguments": {} })));
        let resp = handle_request(&req, &tools, &f.service, &f.config, Some("dev-token"));
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[test]
    fn bad_arguments_are_invalid_params() {
        let f = fixture();
        let req = make_req(8, "tools/call", Some(json!({ "name": "get_snapshot_status", "arguments": {} })));
        let resp = handle_request(&req, &tools::all_tools(), &f.service, &f.config, Some("dev-token"));
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[test]
    fn domain_refusal_is_tool_error_result() {
        let f = fixture();
        let req = make_req(
            9,
            "tools/call",
            Some(json!({ "name": "get_snapshot_status", "arguments": { "snapshot_id": Uuid::new_v4() } })),
        );
        let resp = handle_request(&req, &tools::all_tools(), &f.service, &f.config, Some("dev-token"));
        assert!(resp.error.is_none());
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("not found"));
    }
}
