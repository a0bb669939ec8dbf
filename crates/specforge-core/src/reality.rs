//! Reality snapshots: an agent is asked to extract the actual state of a
//! codebase and post it back for a conformance verdict.
//!
//! ```text
//! initiated -> awaiting_post -> analyzing -> completed
//!                                         \-> failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, SpecError};
use crate::types::SnapshotState;

pub const DEPENDENCY_INTEGRITY: f64 = 0.9;
pub const STRUCTURAL_ALIGNMENT: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    RequiresReview,
    Failed,
}

impl Verdict {
    pub fn from_conformance(conformance: f64) -> Self {
        if conformance >= 0.7 {
            Verdict::Approved
        } else if conformance >= 0.4 {
            Verdict::RequiresReview
        } else {
            Verdict::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Option<SnapshotState>,
    pub to: SnapshotState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealityAnalysis {
    pub conformance: f64,
    pub dependency_integrity: f64,
    pub structural_alignment: f64,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealitySnapshot {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(default)]
    pub roadmap_item_id: Option<Uuid>,
    pub state: SnapshotState,
    #[serde(default)]
    pub scope: Value,
    #[serde(default)]
    pub analysis: Option<RealityAnalysis>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub history: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RealitySnapshot {
    /// Move to `next`, rejecting anything outside the legal table.
    pub fn transition(&mut self, next: SnapshotState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SpecError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        self.history.push(Transition {
            from: Some(self.state),
            to: next,
            at: now,
        });
        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}

pub trait RealityRepo {
    fn project_exists(&self, project_id: Uuid) -> Result<bool>;
    fn save_reality_snapshot(&self, snapshot: &RealitySnapshot) -> Result<()>;
    fn reality_snapshot(&self, id: Uuid) -> Result<RealitySnapshot>;
    /// Non-terminal snapshots of a project, oldest first.
    fn active_reality_snapshots(&self, project_id: Uuid) -> Result<Vec<RealitySnapshot>>;
}

fn non_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(m)) => !m.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Score a posted extraction. Accepts `fileTree`/`file_tree` and
/// `apiRoutes`/`api_routes`.
pub fn analyze(data: &Value) -> RealityAnalysis {
    let file_tree = non_empty(data.get("fileTree").or_else(|| data.get("file_tree")));
    let api_routes = non_empty(data.get("apiRoutes").or_else(|| data.get("api_routes")));
    let migrations = non_empty(data.get("db").and_then(|db| db.get("migrations")));

    let mut conformance = 0.0;
    if file_tree {
        conformance += 0.4;
    }
    if api_routes {
        conformance += 0.3;
    }
    if migrations {
        conformance += 0.3;
    }
    // keep 0.4+0.3 from landing just under the 0.7 threshold
    let conformance = (conformance * 100.0_f64).round() / 100.0;

    RealityAnalysis {
        conformance,
        dependency_integrity: DEPENDENCY_INTEGRITY,
        structural_alignment: STRUCTURAL_ALIGNMENT,
        verdict: Verdict::from_conformance(conformance),
    }
}

fn extraction_instructions(snapshot: &RealitySnapshot) -> Value {
    json!({
        "snapshot_id": snapshot.id,
        "state": snapshot.state,
        "extract": {
            "fileTree": "array of repository-relative file paths",
            "apiRoutes": "array of {method, path} for every exposed route",
            "db": {"migrations": "array of applied migration names"}
        },
        "next": "call post_snapshot with snapshot_id and the extracted data"
    })
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Open a snapshot and hand the extraction request to the agent. Only one
/// snapshot may be active per (project, roadmap item).
pub fn create_snapshot<R: RealityRepo + ?Sized>(
    repo: &R,
    project_id: Uuid,
    roadmap_item_id: Option<Uuid>,
    scope: Value,
) -> Result<(RealitySnapshot, Value)> {
    if !repo.project_exists(project_id)? {
        return Err(SpecError::not_found("project", project_id));
    }
    if let Some(active) = repo
        .active_reality_snapshots(project_id)?
        .into_iter()
        .find(|s| s.roadmap_item_id == roadmap_item_id)
    {
        return Err(SpecError::InvalidRequest(format!(
            "snapshot {} is already active for this scope",
            active.id
        )));
    }

    let now = Utc::now();
    let mut snapshot = RealitySnapshot {
        id: Uuid::new_v4(),
        project_id,
        roadmap_item_id,
        state: SnapshotState::Initiated,
        scope,
        analysis: None,
        failure_reason: None,
        history: vec![Transition {
            from: None,
            to: SnapshotState::Initiated,
            at: now,
        }],
        created_at: now,
        updated_at: now,
    };
    snapshot.transition(SnapshotState::AwaitingPost)?;
    repo.save_reality_snapshot(&snapshot)?;
    tracing::info!(snapshot_id = %snapshot.id, project_id = %project_id, "reality snapshot created");

    let instructions = extraction_instructions(&snapshot);
    Ok((snapshot, instructions))
}

/// Accept the extracted data, analyze it and close the snapshot.
pub fn post_snapshot<R: RealityRepo + ?Sized>(repo: &R, snapshot_id: Uuid, data: &Value) -> Result<RealitySnapshot> {
    let mut snapshot = repo.reality_snapshot(snapshot_id)?;
    snapshot.transition(SnapshotState::Analyzing)?;
    repo.save_reality_snapshot(&snapshot)?;

    if data.as_object().map_or(true, |m| m.is_empty()) {
        snapshot.failure_reason = Some("posted snapshot data must be a non-empty object".into());
        snapshot.transition(SnapshotState::Failed)?;
    } else {
        snapshot.analysis = Some(analyze(data));
        snapshot.transition(SnapshotState::Completed)?;
    }
    repo.save_reality_snapshot(&snapshot)?;
    tracing::info!(
        snapshot_id = %snapshot_id,
        state = %snapshot.state,
        "reality snapshot analyzed"
    );
    Ok(snapshot)
}

pub fn get_snapshot_status<R: RealityRepo + ?Sized>(repo: &R, snapshot_id: Uuid) -> Result<RealitySnapshot> {
    repo.reality_snapshot(snapshot_id)
}

pub fn list_active_snapshots<R: RealityRepo + ?Sized>(repo: &R, project_id: Uuid) -> Result<Vec<RealitySnapshot>> {
    repo.active_reality_snapshots(project_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct FakeRepo {
        snapshots: RefCell<BTreeMap<Uuid, RealitySnapshot>>,
    }

    impl RealityRepo for FakeRepo {
        fn project_exists(&self, _: Uuid) -> Result<bool> {
            Ok(true)
        }
        fn save_reality_snapshot(&self, s: &RealitySnapshot) -> Result<()> {
            self.snapshots.borrow_mut().insert(s.id, s.clone());
            Ok(())
        }
        fn reality_snapshot(&self, id: Uuid) -> Result<RealitySnapshot> {
            self.snapshots
                .borrow()
                .get(&id)
                .cloned()
                .ok_or_else(|| SpecError::not_found("snapshot", id))
        }
        fn active_reality_snapshots(&self, project_id: Uuid) -> Result<Vec<RealitySnapshot>> {
            Ok(self
                .snapshots
                .borrow()
                .values()
                .filter(|s| s.project_id == project_id && !s.state.is_terminal())
                .cloned()
                .collect())
        }
    }

    fn assert_legal(history: &[Transition]) {
        for t in history {
            if let Some(from) = t.from {
                assert!(from.can_transition_to(t.to), "{from} -> {}", t.to);
            }
        }
    }

    #[test]
    fn full_lifecycle_approves_complete_extraction() {
        let repo = FakeRepo::default();
        let pid = Uuid::new_v4();
        let (snap, instructions) = create_snapshot(&repo, pid, None, json!({})).unwrap();
        assert_eq!(snap.state, SnapshotState::AwaitingPost);
        assert_eq!(instructions["snapshot_id"], json!(snap.id));

        let done = post_snapshot(
            &repo,
            snap.id,
            &json!({"fileTree": ["src/main.rs"], "apiRoutes": [{"method": "GET", "path": "/"}], "db": {"migrations": ["001"]}}),
        )
        .unwrap();
        assert_eq!(done.state, SnapshotState::Completed);
        let analysis = done.analysis.clone().unwrap();
        assert_eq!(analysis.conformance, 1.0);
        assert_eq!(analysis.verdict, Verdict::Approved);
        assert_eq!(analysis.dependency_integrity, 0.9);
        assert_legal(&done.history);
        assert!(list_active_snapshots(&repo, pid).unwrap().is_empty());
    }

    #[test]
    fn verdict_thresholds() {
        let tree_and_routes = analyze(&json!({"fileTree": ["a"], "apiRoutes": ["b"]}));
        assert_eq!(tree_and_routes.verdict, Verdict::Approved);
        let tree_only = analyze(&json!({"fileTree": ["a"]}));
        assert_eq!(tree_only.verdict, Verdict::RequiresReview);
        let routes_only = analyze(&json!({"apiRoutes": ["a"]}));
        assert_eq!(routes_only.verdict, Verdict::Failed);
    }

    #[test]
    fn posting_twice_is_an_invalid_transition() {
        let repo = FakeRepo::default();
        let (snap, _) = create_snapshot(&repo, Uuid::new_v4(), None, json!({})).unwrap();
        post_snapshot(&repo, snap.id, &json!({"fileTree": ["a"]})).unwrap();
        let err = post_snapshot(&repo, snap.id, &json!({"fileTree": ["a"]})).unwrap_err();
        assert!(err.to_string().contains("invalid state transition"));
    }

    #[test]
    fn empty_post_fails_the_snapshot() {
        let repo = FakeRepo::default();
        let (snap, _) = create_snapshot(&repo, Uuid::new_v4(), None, json!({})).unwrap();
        let failed = post_snapshot(&repo, snap.id, &json!({})).unwrap();
        assert_eq!(failed.state, SnapshotState::Failed);
        assert!(failed.failure_reason.is_some());
        assert_legal(&failed.history);
    }

    #[test]
    fn one_active_snapshot_per_scope() {
        let repo = FakeRepo::default();
        let pid = Uuid::new_v4();
        let item = Some(Uuid::new_v4());
        create_snapshot(&repo, pid, item, json!({})).unwrap();
        assert!(create_snapshot(&repo, pid, item, json!({})).is_err());
        // a different item in the same project is a different scope
        assert!(create_snapshot(&repo, pid, None, json!({})).is_ok());
        assert_eq!(list_active_snapshots(&repo, pid).unwrap().len(), 2);
    }
}
