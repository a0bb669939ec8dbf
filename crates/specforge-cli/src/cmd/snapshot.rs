use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::Path;

use crate::client::McpClient;
use crate::cmd::{parse_id, read_json};
use crate::output::{print_json, scalar};

fn open_snapshot(client: &McpClient, project: &str, item: Option<&str>, scope: Value) -> Result<Value> {
    let project_id = parse_id("project", project)?;
    let mut args = json!({ "project_id": project_id, "scope": scope });
    if let Some(item) = item {
        args["roadmap_item_id"] = json!(parse_id("roadmap item", item)?);
    }
    client.call_tool("create_snapshot", args)
}

fn print_analysis(snapshot: &Value) {
    let analysis = &snapshot["analysis"];
    println!("snapshot:   {}", scalar(&snapshot["id"]));
    println!("state:      {}", scalar(&snapshot["state"]));
    if analysis.is_object() {
        println!("conformance:           {}", scalar(&analysis["conformance"]));
        println!("dependency integrity:  {}", scalar(&analysis["dependency_integrity"]));
        println!("structural alignment:  {}", scalar(&analysis["structural_alignment"]));
        println!("verdict:    {}", scalar(&analysis["verdict"]));
    }
}

// ---------------------------------------------------------------------------
// create-snapshot
// ---------------------------------------------------------------------------

pub fn create(client: &McpClient, project: &str, item: Option<&str>, scope: Option<&str>, json: bool) -> Result<()> {
    let scope: Value = match scope {
        Some(raw) => serde_json::from_str(raw).context("--scope must be a JSON object")?,
        None => json!({}),
    };
    if !scope.is_object() {
        bail!("--scope must be a JSON object");
    }
    let created = open_snapshot(client, project, item, scope)?;

    if json {
        return print_json(&created);
    }
    println!("snapshot: {}", scalar(&created["snapshot_id"]));
    println!("state:    {}", scalar(&created["state"]));
    println!("request:");
    println!("{}", serde_json::to_string_pretty(&created["request"])?);
    Ok(())
}

// ---------------------------------------------------------------------------
// post-snapshot
// ---------------------------------------------------------------------------

pub fn post(client: &McpClient, snapshot: &str, data: &Path, json: bool) -> Result<()> {
    let snapshot_id = parse_id("snapshot", snapshot)?;
    let data = read_json(data)?;
    let posted = client.call_tool("post_snapshot", json!({ "snapshot_id": snapshot_id, "data": data }))?;

    if json {
        return print_json(&posted);
    }
    print_analysis(&posted);
    Ok(())
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

/// create + post in one go; anything but an approved verdict is an error.
pub fn verify(client: &McpClient, project: &str, item: Option<&str>, data: &Path, json: bool) -> Result<()> {
    let data = read_json(data)?;
    let created = open_snapshot(client, project, item, json!({}))?;
    let snapshot_id = created["snapshot_id"].clone();
    let posted = client.call_tool("post_snapshot", json!({ "snapshot_id": snapshot_id, "data": data }))?;

    if json {
        print_json(&posted)?;
    } else {
        print_analysis(&posted);
    }

    match posted["analysis"]["verdict"].as_str() {
        Some("approved") => Ok(()),
        Some(verdict) => bail!("reality check {verdict} for snapshot {}", scalar(&snapshot_id)),
        None => bail!("snapshot {} ended {} without a verdict", scalar(&snapshot_id), scalar(&posted["state"])),
    }
}
