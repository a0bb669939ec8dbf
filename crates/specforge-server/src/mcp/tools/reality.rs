use serde_json::{json, Value};

use super::{object_arg, optional_uuid_arg, to_value, uuid_arg, McpTool, ToolContext, ToolError};

pub struct CreateSnapshotTool;

impl McpTool for CreateSnapshotTool {
    fn name(&self) -> &str {
        "create_snapshot"
    }

    fn description(&self) -> &str {
        "Open a reality snapshot for a project (optionally one roadmap item) and receive the extraction request"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": { "type": "string", "description": "Project UUID" },
                "roadmap_item_id": { "type": "string", "description": "Optional roadmap item UUID" },
                "scope": { "type": "object", "description": "Free-form extraction scope" }
            },
            "required": ["project_id"]
        })
    }

    fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
        let project_id = uuid_arg(&args, "project_id")?;
        ctx.authorize(project_id)?;
        let roadmap_item_id = optional_uuid_arg(&args, "roadmap_item_id")?;
        let scope = args.get("scope").cloned().unwrap_or_else(|| json!({}));

        let (snapshot, request) = ctx
            .service
            .create_reality_snapshot(project_id, roadmap_item_id, scope)?;
        Ok(json!({
            "snapshot_id": snapshot.id,
            "state": snapshot.state,
            "request": request,
        }))
    }
}

pub struct PostSnapshotTool;

impl McpTool for PostSnapshotTool {
    fn name(&self) -> &str {
        "post_snapshot"
    }

    fn description(&self) -> &str {
        "Post extracted environment data for an awaiting snapshot; it is analyzed and closed"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "snapshot_id": { "type": "string", "description": "Snapshot UUID" },
                "data": {
                    "type": "object",
                    "description": "Extracted data: fileTree, apiRoutes, db.migrations, ..."
                }
            },
            "required": ["snapshot_id", "data"]
        })
    }

    fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
        let snapshot_id = uuid_arg(&args, "snapshot_id")?;
        let data = object_arg(&args, "data")?;
        let current = ctx.service.reality_snapshot(snapshot_id)?;
        ctx.authorize(current.project_id)?;

        let snapshot = ctx.service.post_reality_snapshot(snapshot_id, data)?;
        to_value(&snapshot)
    }
}

pub struct GetSnapshotStatusTool;

impl McpTool for GetSnapshotStatusTool {
    fn name(&self) -> &str {
        "get_snapshot_status"
    }

    fn description(&self) -> &str {
        "Current state, transition history and analysis of a snapshot"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "snapshot_id": { "type": "string", "description": "Snapshot UUID" }
            },
            "required": ["snapshot_id"]
        })
    }

    fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
        let snapshot_id = uuid_arg(&args, "snapshot_id")?;
        let snapshot = ctx.service.reality_snapshot(snapshot_id)?;
        ctx.authorize(snapshot.project_id)?;
        to_value(&snapshot)
    }
}

pub struct ListActiveSnapshotsTool;

impl McpTool for ListActiveSnapshotsTool {
    fn name(&self) -> &str {
        "list_active_snapshots"
    }

    fn description(&self) -> &str {
        "Snapshots of a project that have not reached completed or failed"
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
        let active = ctx.service.active_reality_snapshots(project_id)?;
        Ok(json!({ "snapshots": to_value(&active)? }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specforge_core::model::NewProject;
    use specforge_core::notify::NoopNotifier;
    use specforge_core::{Service, Store};
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn setup() -> (TempDir, Service, Uuid) {
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
        (dir, service, project.id)
    }

    #[test]
    fn create_then_post_completes_with_verdict() {
        let (_dir, service, project_id) = setup();
        let ctx = ToolContext {
            service: &service,
            scope: Some(project_id),
        };

        let created = CreateSnapshotTool
            .call(json!({ "project_id": project_id.to_string() }), &ctx)
            .unwrap();
        assert_eq!(created["state"], "awaiting_post");
        let id = created["snapshot_id"].as_str().unwrap().to_string();

        let active = ListActiveSnapshotsTool
            .call(json!({ "project_id": project_id.to_string() }), &ctx)
            .unwrap();
        assert_eq!(active["snapshots"].as_array().unwrap().len(), 1);

        let posted = PostSnapshotTool
            .call(
                json!({
                    "snapshot_id": id,
                    "data": { "fileTree": ["src/main.rs"], "apiRoutes": ["/health"], "db": { "migrations": [] } }
                }),
                &ctx,
            )
            .unwrap();
        assert_eq!(posted["state"], "completed");
        assert_eq!(posted["analysis"]["verdict"], "approved");

        let again = PostSnapshotTool.call(json!({ "snapshot_id": id, "data": { "x": 1 } }), &ctx);
        assert!(matches!(again, Err(ToolError::Failed(msg)) if msg.contains("invalid state transition")));
    }

    #[test]
    fn token_scope_is_enforced() {
        let (_dir, service, _project_id) = setup();
        let ctx = ToolContext {
            service: &service,
            scope: Some(Uuid::new_v4()),
        };
        let res = ListActiveSnapshotsTool.call(json!({ "project_id": Uuid::new_v4().to_string() }), &ctx);
        assert!(matches!(res, Err(ToolError::Unauthorized(_))));
    }

    #[test]
    fn post_requires_object_data() {
        let (_dir, service, _) = setup();
        let ctx = ToolContext { service: &service, scope: None };
        let res = PostSnapshotTool.call(json!({ "snapshot_id": Uuid::new_v4().to_string() }), &ctx);
        assert!(matches!(res, Err(ToolError::InvalidParams(_))));
    }
}
