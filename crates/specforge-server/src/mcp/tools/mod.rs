use serde_json::Value;
use uuid::Uuid;

use specforge_core::{Service, SpecError};

pub mod import;
pub mod reality;

/// How a tool call failed. Parameter and auth problems become JSON-RPC
/// errors; domain refusals are reported as an `isError` tool result.
#[derive(Debug)]
pub enum ToolError {
    InvalidParams(String),
    Unauthorized(String),
    Failed(String),
    Internal(String),
}

impl From<SpecError> for ToolError {
    fn from(e: SpecError) -> Self {
        match e {
            SpecError::InvalidId(_) | SpecError::MissingField(_) | SpecError::InvalidRequest(_) => {
                ToolError::InvalidParams(e.to_string())
            }
            SpecError::Unauthorized(_) => ToolError::Unauthorized(e.to_string()),
            SpecError::Db(_) | SpecError::Io(_) | SpecError::Json(_) | SpecError::Yaml(_) => {
                ToolError::Internal(e.to_string())
            }
            _ => ToolError::Failed(e.to_string()),
        }
    }
}

/// Caller of a tool: the service and the project the bearer token is bound
/// to (`None` for the static fallback token, which reaches every project).
pub struct ToolContext<'a> {
    pub service: &'a Service,
    pub scope: Option<Uuid>,
}

impl ToolContext<'_> {
    pub fn authorize(&self, project_id: Uuid) -> Result<(), ToolError> {
        match self.scope {
            Some(scope) if scope != project_id => Err(ToolError::Unauthorized(format!(
                "token is not valid for project {project_id}"
            ))),
            _ => Ok(()),
        }
    }
}

pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<Value, ToolError>;
}

pub fn all_tools() -> Vec<Box<dyn McpTool>> {
    vec![
        Box::new(reality::CreateSnapshotTool),
        Box::new(reality::PostSnapshotTool),
        Box::new(reality::GetSnapshotStatusTool),
        Box::new(reality::ListActiveSnapshotsTool),
        Box::new(import::InitProjectImportTool),
        Box::new(import::SubmitProjectSnapshotTool),
        Box::new(import::GetImportAlignmentRulesTool),
        Box::new(import::SubmitPostImportSnapshotTool),
        Box::new(import::FinalizeProjectImportTool),
    ]
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn uuid_arg(args: &Value, key: &str) -> Result<Uuid, ToolError> {
    let raw = args[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidParams(format!("missing required argument: {key}")))?;
    Uuid::parse_str(raw).map_err(|_| ToolError::InvalidParams(format!("argument {key} is not a UUID: {raw}")))
}

pub(crate) fn optional_uuid_arg(args: &Value, key: &str) -> Result<Option<Uuid>, ToolError> {
    match &args[key] {
        Value::Null => Ok(None),
        _ => uuid_arg(args, key).map(Some),
    }
}

pub(crate) fn object_arg<'a>(args: &'a Value, key: &str) -> Result<&'a Value, ToolError> {
    match &args[key] {
        v @ Value::Object(_) => Ok(v),
        Value::Null => Err(ToolError::InvalidParams(format!("missing required argument: {key}"))),
        _ => Err(ToolError::InvalidParams(format!("argument {key} must be an object"))),
    }
}

pub(crate) fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, ToolError> {
    serde_json::to_value(v).map_err(|e| ToolError::Internal(format!("serialization error: {e}")))
}
