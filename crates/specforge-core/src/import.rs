//! Iterative project catalogue import.
//!
//! An external agent opens a session, submits partial catalogues over several
//! rounds and finally locks the session. Every submission is kept verbatim as
//! an `ImportArtifact`; the merged catalogue is rebuilt from artifacts on
//! each read.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::alignment::{self, AlignmentRepo};
use crate::drift::{self, DriftPolicy, DriftReport};
use crate::error::{Result, SpecError};
use crate::types::ImportStatus;

pub const REQUIRED_CATEGORIES: &[&str] = &[
    "project_overview",
    "tech_stack",
    "modules",
    "apis",
    "data_models",
    "contracts",
    "risks",
    "change_sensitivity",
];

pub const OPTIONAL_CATEGORIES: &[&str] = &["validation_rules", "current_state"];

/// A category array with this many entries counts as fully covered.
pub const FULL_CATEGORY_SIZE: usize = 5;

/// Score at which a final submission locks the session.
pub const AUTO_LOCK_THRESHOLD: i32 = 95;

/// Share of catalogued names a post-import snapshot may lose while the
/// verdict stays at medium risk.
pub const MAX_DRIFT_RATIO: f64 = 0.2;

/// Post-import alignment scores below these raise the risk level.
pub const ALIGNMENT_WARN_BELOW: i32 = 80;
pub const ALIGNMENT_FAIL_BELOW: i32 = 50;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSession {
    pub id: Uuid,
    pub project_id: Uuid,
    pub completeness_score: i32,
    pub iteration_count: u32,
    pub locked: bool,
    pub status: ImportStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Submission,
    PostImport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportArtifact {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: ArtifactKind,
    pub iteration: u32,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub final_submission: bool,
    pub created_at: DateTime<Utc>,
}

impl ImportSession {
    pub(crate) fn supersede(&mut self) {
        self.locked = true;
        self.status = ImportStatus::Superseded;
        self.updated_at = Utc::now();
    }
}

/// Read/write capabilities of the import protocol.
pub trait ImportRepo {
    fn project_exists(&self, project_id: Uuid) -> Result<bool>;
    fn save_import_session(&self, session: &ImportSession) -> Result<()>;
    fn import_session(&self, session_id: Uuid) -> Result<ImportSession>;
    fn latest_import_session(&self, project_id: Uuid) -> Result<Option<ImportSession>>;
    fn append_import_artifact(&self, artifact: &ImportArtifact) -> Result<()>;
    /// Artifacts of a session in arrival order.
    fn import_artifacts(&self, session_id: Uuid) -> Result<Vec<ImportArtifact>>;

    /// Store a fresh session and supersede the project's open one, returning
    /// the superseded session's id. Stores override this to do both writes
    /// in one transaction.
    fn open_import_session(&self, session: &ImportSession) -> Result<Option<Uuid>> {
        let previous = self
            .latest_import_session(session.project_id)?
            .filter(|s| !s.locked);
        if let Some(mut prev) = previous.clone() {
            prev.supersede();
            self.save_import_session(&prev)?;
        }
        self.save_import_session(session)?;
        Ok(previous.map(|s| s.id))
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ImportInit {
    pub session_id: Uuid,
    pub project_id: Uuid,
    /// Open session this one replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_session_id: Option<Uuid>,
    pub required_categories: Vec<&'static str>,
    pub optional_categories: Vec<&'static str>,
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    pub session_id: Uuid,
    pub iteration: u32,
    pub completeness_score: i32,
    pub missing_categories: Vec<String>,
    pub locked: bool,
    pub status: ImportStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostImportVerdict {
    pub session_id: Uuid,
    /// Catalogue entries the structural snapshot no longer contains.
    pub missing: Map<String, Value>,
    /// Snapshot entries the catalogue never mentioned.
    pub added: Map<String, Value>,
    pub drift_ratio: f64,
    /// Drift engine run over the OpenAPI views of catalogue and snapshot.
    pub drift: DriftReport,
    /// Score of the alignment check run for this verdict.
    pub alignment_score: i32,
    pub alignment_conflicts: usize,
    pub risk_level: &'static str,
    pub recommendation: String,
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

fn category_coverage(value: Option<&Value>) -> f64 {
    match value {
        None | Some(Value::Null) => 0.0,
        Some(Value::Array(items)) => {
            (items.len() as f64 / FULL_CATEGORY_SIZE as f64).min(1.0)
        }
        Some(Value::Object(map)) => {
            if map.is_empty() {
                0.0
            } else {
                1.0
            }
        }
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                0.0
            } else {
                1.0
            }
        }
        Some(_) => 1.0,
    }
}

/// Completeness of a merged catalogue in [0,100] plus the required
/// categories that are still absent or empty.
pub fn completeness(catalogue: &Map<String, Value>) -> (i32, Vec<String>) {
    let mut total = 0.0;
    let mut missing = Vec::new();
    for category in REQUIRED_CATEGORIES {
        let coverage = category_coverage(catalogue.get(*category));
        if coverage == 0.0 {
            missing.push(category.to_string());
        }
        total += coverage;
    }
    let mean = total / REQUIRED_CATEGORIES.len() as f64;
    ((mean * 100.0).round() as i32, missing)
}

/// Fold one payload into the catalogue: arrays concatenate, maps merge
/// shallowly with later keys winning, everything else is replaced.
pub fn merge_into(catalogue: &mut Map<String, Value>, payload: &Map<String, Value>) {
    for (category, incoming) in payload {
        match (catalogue.get_mut(category), incoming) {
            (Some(Value::Array(existing)), Value::Array(more)) => {
                existing.extend(more.iter().cloned());
            }
            (Some(Value::Object(existing)), Value::Object(more)) => {
                for (k, v) in more {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => {
                catalogue.insert(category.clone(), incoming.clone());
            }
        }
    }
}

pub fn merge_artifacts(artifacts: &[ImportArtifact]) -> Map<String, Value> {
    let mut catalogue = Map::new();
    for artifact in artifacts.iter().filter(|a| a.kind == ArtifactKind::Submission) {
        merge_into(&mut catalogue, &artifact.payload);
    }
    catalogue
}

/// Display name of a catalogue entry: the string itself, or the first of
/// `name`, `path`, `title` on an object.
pub fn entry_name(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => ["name", "path", "title"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn names(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(entry_name).collect())
        .unwrap_or_default()
}

/// OpenAPI view of a catalogue or structural snapshot for the drift engine.
/// An embedded `openapi` document is used as is; otherwise `paths` come
/// from `apis` entries with a `method` and `path`, and `components.schemas`
/// from `data_models` entries with a `schema`.
pub fn structural_document(map: &Map<String, Value>) -> Value {
    if let Some(doc @ Value::Object(_)) = map.get("openapi") {
        return doc.clone();
    }
    let mut paths = Map::new();
    for api in map.get("apis").and_then(Value::as_array).into_iter().flatten() {
        let (Some(method), Some(path)) = (
            api.get("method").and_then(Value::as_str),
            api.get("path").and_then(Value::as_str),
        ) else {
            continue;
        };
        let operation = api.get("operation").cloned().unwrap_or_else(|| json!({}));
        if let Value::Object(methods) = paths.entry(path.to_string()).or_insert_with(|| json!({})) {
            methods.insert(method.to_lowercase(), operation);
        }
    }
    let mut schemas = Map::new();
    for model in map.get("data_models").and_then(Value::as_array).into_iter().flatten() {
        if let (Some(name), Some(schema)) = (entry_name(model), model.get("schema")) {
            schemas.insert(name, schema.clone());
        }
    }
    json!({ "paths": paths, "components": { "schemas": schemas } })
}

fn risk_rank(level: &str) -> u8 {
    match level {
        "low" => 0,
        "medium" => 1,
        _ => 2,
    }
}

fn raise(current: &'static str, candidate: &'static str) -> &'static str {
    if risk_rank(candidate) > risk_rank(current) {
        candidate
    } else {
        current
    }
}

/// Static policy surface returned to importing agents.
pub fn alignment_rules() -> Value {
    json!({
        "strict_rules": [
            "report only what exists in the codebase; never invent modules or endpoints",
            "use the exact names found in source for modules, routes and models",
            "submit arrays for list categories and objects for descriptive categories",
            "every api entry carries method, path and the owning module when known"
        ],
        "forbidden_actions": [
            "modifying source files during import",
            "executing project code or migrations",
            "submitting secrets, credentials or environment values"
        ],
        "snapshot_policy": {
            "post_import_snapshot_required": true,
            "categories": ["modules", "apis", "data_models"],
            "max_drift_ratio": MAX_DRIFT_RATIO,
            "block_on_critical_drift": true,
            "min_alignment_score": ALIGNMENT_WARN_BELOW
        },
        "required_categories": REQUIRED_CATEGORIES,
        "optional_categories": OPTIONAL_CATEGORIES,
        "auto_lock_threshold": AUTO_LOCK_THRESHOLD
    })
}

// ---------------------------------------------------------------------------
// Protocol operations
// ---------------------------------------------------------------------------

pub fn init_project_import<R: ImportRepo + ?Sized>(repo: &R, project_id: Uuid) -> Result<ImportInit> {
    if !repo.project_exists(project_id)? {
        return Err(SpecError::not_found("project", project_id));
    }
    let now = Utc::now();
    let session = ImportSession {
        id: Uuid::new_v4(),
        project_id,
        completeness_score: 0,
        iteration_count: 0,
        locked: false,
        status: ImportStatus::Partial,
        created_at: now,
        updated_at: now,
    };
    let superseded = repo.open_import_session(&session)?;
    if let Some(previous) = superseded {
        tracing::info!(project_id = %project_id, session_id = %previous, "open import session superseded");
    }
    tracing::info!(project_id = %project_id, session_id = %session.id, "import session opened");

    Ok(ImportInit {
        session_id: session.id,
        project_id,
        superseded_session_id: superseded,
        required_categories: REQUIRED_CATEGORIES.to_vec(),
        optional_categories: OPTIONAL_CATEGORIES.to_vec(),
        instructions: format!(
            "Submit the catalogue in one or more rounds with submit_project_snapshot. \
             Lists concatenate across rounds; objects merge by key. Set final_submission \
             once done; the session locks at {AUTO_LOCK_THRESHOLD}% completeness."
        ),
    })
}

pub fn submit_project_snapshot<R: ImportRepo + ?Sized>(
    repo: &R,
    session_id: Uuid,
    payload: &Value,
    final_submission: bool,
) -> Result<SubmissionResult> {
    let mut session = repo.import_session(session_id)?;
    if session.locked {
        return Err(SpecError::SessionLocked(session_id.to_string()));
    }
    let payload = match payload {
        Value::Object(map) if !map.is_empty() => map.clone(),
        _ => return Err(SpecError::EmptySubmission),
    };

    session.iteration_count += 1;
    repo.append_import_artifact(&ImportArtifact {
        id: Uuid::new_v4(),
        session_id,
        kind: ArtifactKind::Submission,
        iteration: session.iteration_count,
        payload,
        final_submission,
        created_at: Utc::now(),
    })?;

    let catalogue = merge_artifacts(&repo.import_artifacts(session_id)?);
    let (score, missing) = completeness(&catalogue);
    // A later scalar can replace an earlier list; the recorded score never drops.
    session.completeness_score = session.completeness_score.max(score);

    if final_submission && session.completeness_score >= AUTO_LOCK_THRESHOLD {
        session.locked = true;
        session.status = ImportStatus::Complete;
    }
    session.updated_at = Utc::now();
    repo.save_import_session(&session)?;

    tracing::info!(
        session_id = %session_id,
        iteration = session.iteration_count,
        score = session.completeness_score,
        locked = session.locked,
        "import submission merged"
    );

    Ok(SubmissionResult {
        session_id,
        iteration: session.iteration_count,
        completeness_score: session.completeness_score,
        missing_categories: missing,
        locked: session.locked,
        status: session.status,
    })
}

pub fn merged_catalogue<R: ImportRepo + ?Sized>(repo: &R, session_id: Uuid) -> Result<Map<String, Value>> {
    repo.import_session(session_id)?;
    Ok(merge_artifacts(&repo.import_artifacts(session_id)?))
}

/// Grade a structural snapshot of the codebase taken after import: names
/// the catalogue lists but the snapshot lacks, the drift engine over both
/// OpenAPI views, and a fresh alignment check of the project.
pub fn submit_post_import_snapshot<R: ImportRepo + AlignmentRepo + ?Sized>(
    repo: &R,
    session_id: Uuid,
    snapshot: &Value,
) -> Result<PostImportVerdict> {
    let session = repo.import_session(session_id)?;
    let snapshot = match snapshot {
        Value::Object(map) if !map.is_empty() => map.clone(),
        _ => return Err(SpecError::EmptySubmission),
    };

    let catalogue = merge_artifacts(&repo.import_artifacts(session_id)?);
    let mut missing = Map::new();
    let mut added = Map::new();
    let mut catalogued = 0usize;
    let mut lost = 0usize;

    for category in ["modules", "apis", "data_models"] {
        let before = names(catalogue.get(category));
        let after = names(snapshot.get(category));
        catalogued += before.len();

        let gone: Vec<&String> = before.difference(&after).collect();
        let new: Vec<&String> = after.difference(&before).collect();
        lost += gone.len();
        if !gone.is_empty() {
            missing.insert(category.to_string(), json!(gone));
        }
        if !new.is_empty() {
            added.insert(category.to_string(), json!(new));
        }
    }

    let drift_ratio = if catalogued == 0 {
        0.0
    } else {
        lost as f64 / catalogued as f64
    };
    let drift = drift::compare(
        &structural_document(&catalogue),
        &structural_document(&snapshot),
        &DriftPolicy::default(),
    );
    let alignment = alignment::trigger_alignment_check(repo, session.project_id)?;

    let mut risk_level = if drift_ratio == 0.0 {
        "low"
    } else if drift_ratio <= MAX_DRIFT_RATIO {
        "medium"
    } else {
        "high"
    };
    if drift.blocked {
        risk_level = raise(risk_level, "high");
    } else if drift.counts.breaking > 0 {
        risk_level = raise(risk_level, "medium");
    }
    if alignment.score < ALIGNMENT_FAIL_BELOW {
        risk_level = raise(risk_level, "high");
    } else if alignment.score < ALIGNMENT_WARN_BELOW {
        risk_level = raise(risk_level, "medium");
    }

    let recommendation = match risk_level {
        "low" => "catalogue matches the codebase; safe to finalize".to_string(),
        "medium" => "minor divergence; review missing entries and drift before finalizing".to_string(),
        _ if drift.blocked => format!(
            "{} critical drift item(s) between catalogue and codebase; resubmit the affected apis and data models",
            drift.counts.critical
        ),
        _ => "catalogue diverges from the codebase; resubmit the missing categories".to_string(),
    };

    repo.append_import_artifact(&ImportArtifact {
        id: Uuid::new_v4(),
        session_id,
        kind: ArtifactKind::PostImport,
        iteration: session.iteration_count,
        payload: snapshot,
        final_submission: false,
        created_at: Utc::now(),
    })?;

    tracing::info!(
        session_id = %session_id,
        drift_ratio,
        critical = drift.counts.critical,
        alignment = alignment.score,
        risk_level,
        "post-import snapshot graded"
    );

    Ok(PostImportVerdict {
        session_id,
        missing,
        added,
        drift_ratio,
        alignment_score: alignment.score,
        alignment_conflicts: alignment.conflicts.len(),
        drift,
        risk_level,
        recommendation,
    })
}

pub fn finalize_project_import<R: ImportRepo + ?Sized>(repo: &R, session_id: Uuid) -> Result<ImportSession> {
    let mut session = repo.import_session(session_id)?;
    if session.status == ImportStatus::Superseded {
        return Err(SpecError::SessionLocked(session_id.to_string()));
    }
    session.locked = true;
    session.status = ImportStatus::Complete;
    session.updated_at = Utc::now();
    repo.save_import_session(&session)?;
    tracing::info!(session_id = %session_id, score = session.completeness_score, "import session finalized");
    Ok(session)
}
