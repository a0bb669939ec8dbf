use serde_json::{json, Value};
use uuid::Uuid;

use specforge_core::import;

use super::{object_arg, to_value, uuid_arg, McpTool, ToolContext, ToolError};

/// Resolve the session and check the caller may touch its project.
fn authorized_session(args: &Value, ctx: &ToolContext<'_>) -> Result<Uuid, ToolError> {
    let session_id = uuid_arg(args, "session_id")?;
    let session = ctx.service.import_session(session_id)?;
    ctx.authorize(session.project_id)?;
    Ok(session_id)
}

pub struct InitProjectImportTool;

impl McpTool for InitProjectImportTool {
    fn name(&self) -> &str {
        "init_project_import"
    }

    fn description(&self) -> &str {
        "Start a catalogue import for a project; returns the session id and the expected categories"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": { "type": "string", "description": "Project UUID" }
            },
            "required": ["project_id"]
        })
    }

    fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
        let project_id = uuid_arg(&args, "project_id")?;
        ctx.authorize(project_id)?;
        let init = ctx.service.init_import(project_id, None)?;
        to_value(&init)
    }
}

pub struct SubmitProjectSnapshotTool;

impl McpTool for SubmitProjectSnapshotTool {
    fn name(&self) -> &str {
        "submit_project_snapshot"
    }

    fn description(&self) -> &str {
        "Submit a partial catalogue (category -> entries); returns the re-scored completeness"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string", "description": "Import session UUID" },
                "payload": { "type": "object", "description": "Map of category to value or array" },
                "final_submission": {
                    "type": "boolean",
                    "description": "Lock the session if completeness reaches the threshold"
                }
            },
            "required": ["session_id", "payload"]
        })
    }

    fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
        let session_id = authorized_session(&args, ctx)?;
        let payload = object_arg(&args, "payload")?;
        let final_submission = args["final_submission"].as_bool().unwrap_or(false);
        let result = ctx.service.submit_import(session_id, payload, final_submission)?;
        to_value(&result)
    }
}

pub struct GetImportAlignmentRulesTool;

impl McpTool for GetImportAlignmentRulesTool {
    fn name(&self) -> &str {
        "get_import_alignment_rules"
    }

    fn description(&self) -> &str {
        "Rules an importing agent must follow: strict rules, forbidden actions, snapshot policy"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn call(&self, _args: Value, _ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
        Ok(import::alignment_rules())
    }
}

pub struct SubmitPostImportSnapshotTool;

impl McpTool for SubmitPostImportSnapshotTool {
    fn name(&self) -> &str {
        "submit_post_import_snapshot"
    }

    fn description(&self) -> &str {
        "Hand a structural snapshot taken after import to drift and alignment for a risk verdict"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string", "description": "Import session UUID" },
                "snapshot": { "type": "object", "description": "Structural snapshot, same categories as the catalogue" }
            },
            "required": ["session_id", "snapshot"]
        })
    }

    fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
        let session_id = authorized_session(&args, ctx)?;
        let snapshot = object_arg(&args, "snapshot")?;
        let verdict = ctx.service.post_import_snapshot(session_id, snapshot)?;
        to_value(&verdict)
    }
}

pub struct FinalizeProjectImportTool;

impl McpTool for FinalizeProjectImportTool {
    fn name(&self) -> &str {
        "finalize_project_import"
    }

    fn description(&self) -> &str {
        "Lock an import session regardless of its completeness"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string", "description": "Import session UUID" }
            },
            "required": ["session_id"]
        })
    }

    fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
        let session_id = authorized_session(&args, ctx)?;
        let session = ctx.service.finalize_import(session_id, None)?;
        to_value(&session)
    }
}
