use anyhow::{bail, Result};
use serde_json::json;
use std::path::Path;

use crate::client::McpClient;
use crate::cmd::{parse_id, read_json};
use crate::output::{print_json, scalar};

/// init -> submit (final) -> optional finalize.
pub fn run(client: &McpClient, project: &str, catalogue: &Path, finalize: bool, json: bool) -> Result<()> {
    let project_id = parse_id("project", project)?;
    let payload = read_json(catalogue)?;
    if !payload.as_object().is_some_and(|m| !m.is_empty()) {
        bail!("{} must hold a non-empty JSON object", catalogue.display());
    }

    let init = client.call_tool("init_project_import", json!({ "project_id": project_id }))?;
    let session_id = init["session_id"].clone();
    tracing::debug!(session = %scalar(&session_id), "import session opened");

    let mut result = client.call_tool(
        "submit_project_snapshot",
        json!({ "session_id": session_id, "payload": payload, "final_submission": true }),
    )?;
    if finalize && !result["locked"].as_bool().unwrap_or(false) {
        let session = client.call_tool("finalize_project_import", json!({ "session_id": session_id }))?;
        result["locked"] = session["locked"].clone();
    }

    if json {
        return print_json(&result);
    }
    println!("session:      {}", scalar(&session_id));
    println!("completeness: {}", scalar(&result["completeness_score"]));
    println!("status:       {}", scalar(&result["status"]));
    println!("locked:       {}", scalar(&result["locked"]));
    let missing: Vec<String> = result["missing_categories"]
        .as_array()
        .map(|a| a.iter().map(scalar).collect())
        .unwrap_or_default();
    if !missing.is_empty() {
        println!("missing:      {}", missing.join(", "));
    }
    Ok(())
}
