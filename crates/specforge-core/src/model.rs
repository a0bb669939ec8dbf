//! Persistent entities of a SpecForge project graph.
//!
//! Every JSON-valued field (schemas, settings, rule configs) is a plain
//! `serde_json::Value`; engines walk it directly.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SpecError};

use crate::types::{
    ContractType, DependencyType, Priority, ProposalStatus, Risk, RoadmapKind, RoadmapStatus,
};

fn empty_object() -> Value {
    Value::Object(Map::new())
}

// ---------------------------------------------------------------------------
// Workspace / Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub settings: Value,
    #[serde(default = "empty_object")]
    pub mcp_config: Value,
    /// Score of the latest alignment report, if one has run.
    #[serde(default)]
    pub alignment_score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn self_critique_enabled(&self) -> bool {
        self.settings
            .get("self_critique")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub settings: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub settings: Option<Value>,
    pub mcp_config: Option<Value>,
}

// ---------------------------------------------------------------------------
// RoadmapItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadmapItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: RoadmapKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub business_context: String,
    #[serde(default)]
    pub technical_context: String,
    pub priority: Priority,
    pub risk: Risk,
    pub status: RoadmapStatus,
    #[serde(default)]
    pub breaking_change: bool,
    #[serde(default)]
    pub regression_sensitive: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRoadmapItem {
    pub kind: RoadmapKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub business_context: String,
    #[serde(default)]
    pub technical_context: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub risk: Option<Risk>,
    #[serde(default)]
    pub breaking_change: bool,
    #[serde(default)]
    pub regression_sensitive: bool,
}

impl NewRoadmapItem {
    pub fn titled(kind: RoadmapKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            business_context: String::new(),
            technical_context: String::new(),
            priority: None,
            risk: None,
            breaking_change: false,
            regression_sensitive: false,
        }
    }
}

/// Partial update of a roadmap item. Status changes go through
/// `transition_roadmap_item` so the governance gate is always consulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoadmapItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub business_context: Option<String>,
    pub technical_context: Option<String>,
    pub priority: Option<Priority>,
    pub risk: Option<Risk>,
    pub breaking_change: Option<bool>,
    pub regression_sensitive: Option<bool>,
}

impl RoadmapItem {
    pub fn apply(&mut self, patch: RoadmapItemPatch) {
        if let Some(v) = patch.title {
            self.title = v;
        }
        if let Some(v) = patch.description {
            self.description = v;
        }
        if let Some(v) = patch.business_context {
            self.business_context = v;
        }
        if let Some(v) = patch.technical_context {
            self.technical_context = v;
        }
        if let Some(v) = patch.priority {
            self.priority = v;
        }
        if let Some(v) = patch.risk {
            self.risk = v;
        }
        if let Some(v) = patch.breaking_change {
            self.breaking_change = v;
        }
        if let Some(v) = patch.regression_sensitive {
            self.regression_sensitive = v;
        }
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Contracts and variables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDefinition {
    pub id: Uuid,
    pub roadmap_item_id: Uuid,
    pub contract_type: ContractType,
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default = "empty_object")]
    pub input_schema: Value,
    #[serde(default = "empty_object")]
    pub output_schema: Value,
    #[serde(default = "empty_object")]
    pub error_schema: Value,
    #[serde(default = "default_true")]
    pub backward_compatible: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContract {
    pub contract_type: ContractType,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub error_schema: Option<Value>,
    #[serde(default = "default_true")]
    pub backward_compatible: bool,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

static SEMVER_RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

/// `MAJOR.MINOR.PATCH` with optional pre-release and build suffixes.
pub fn validate_version(version: &str) -> Result<()> {
    let re = SEMVER_RE
        .get_or_init(|| {
            Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$")
        })
        .as_ref()
        .map_err(|e| SpecError::InvalidRequest(format!("version pattern: {e}")))?;
    if !re.is_match(version) {
        return Err(SpecError::InvalidRequest(format!(
            "contract version '{version}' is not a semantic version"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractPatch {
    pub name: Option<String>,
    pub version: Option<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub error_schema: Option<Value>,
    pub backward_compatible: Option<bool>,
}

impl ContractDefinition {
    pub fn apply(&mut self, patch: ContractPatch) {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if let Some(v) = patch.version {
            self.version = v;
        }
        if let Some(v) = patch.input_schema {
            self.input_schema = v;
        }
        if let Some(v) = patch.output_schema {
            self.output_schema = v;
        }
        if let Some(v) = patch.error_schema {
            self.error_schema = v;
        }
        if let Some(v) = patch.backward_compatible {
            self.backward_compatible = v;
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub id: Uuid,
    pub contract_id: Uuid,
    /// Denormalised owner so orphan detection can scope by project even after
    /// the contract is gone.
    pub project_id: Uuid,
    pub name: String,
    pub var_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default = "empty_object")]
    pub validation_rules: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewVariable {
    pub name: String,
    pub var_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub validation_rules: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariablePatch {
    pub name: Option<String>,
    pub var_type: Option<String>,
    pub required: Option<bool>,
    pub default_value: Option<Value>,
    pub validation_rules: Option<Value>,
}

impl VariableDefinition {
    pub fn apply(&mut self, patch: VariablePatch) {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if let Some(v) = patch.var_type {
            self.var_type = v;
        }
        if let Some(v) = patch.required {
            self.required = v;
        }
        if let Some(v) = patch.default_value {
            self.default_value = Some(v);
        }
        if let Some(v) = patch.validation_rules {
            self.validation_rules = v;
        }
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Rules, requirements, dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub rule_type: String,
    #[serde(default = "empty_object")]
    pub config: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewValidationRule {
    pub name: String,
    pub rule_type: String,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: Uuid,
    pub roadmap_item_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub testable: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRequirement {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub testable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadmapDependency {
    pub id: Uuid,
    pub project_id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDependency {
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(default = "default_dependency_type")]
    pub dependency_type: DependencyType,
}

fn default_dependency_type() -> DependencyType {
    DependencyType::Direct
}

// ---------------------------------------------------------------------------
// Snapshots, proposals, drift events
// ---------------------------------------------------------------------------

/// Immutable capture of a roadmap item's world, addressed by the SHA-256 of
/// its JSON serialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub id: Uuid,
    pub roadmap_item_id: Uuid,
    pub snapshot_data: Value,
    pub content_hash: String,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiProposal {
    pub id: Uuid,
    pub roadmap_item_id: Uuid,
    pub changes: Map<String, Value>,
    #[serde(default)]
    pub rationale: String,
    pub status: ProposalStatus,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    #[serde(default)]
    pub decided_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProposal {
    pub changes: Map<String, Value>,
    #[serde(default)]
    pub rationale: String,
}

/// A recorded drift check against a contract. `risk` lives in [0,1] and is a
/// different metric from the severity counts of a drift report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEvent {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub roadmap_item_id: Uuid,
    pub risk: f64,
    pub critical: usize,
    pub breaking: usize,
    pub warning: usize,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    #[serde(default)]
    pub actor: Option<Uuid>,
    #[serde(default)]
    pub changes: Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> RoadmapItem {
        let now = Utc::now();
        RoadmapItem {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            kind: RoadmapKind::Feature,
            title: "Checkout".into(),
            description: String::new(),
            business_context: String::new(),
            technical_context: String::new(),
            priority: Priority::Medium,
            risk: Risk::Low,
            status: RoadmapStatus::Draft,
            breaking_change: false,
            regression_sensitive: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn contract_versions_must_be_semver() {
        for ok in ["1.0.0", "0.3.12", "2.0.0-rc.1", "1.2.3+build.5"] {
            assert!(validate_version(ok).is_ok(), "{ok}");
        }
        for bad in ["1.0", "v1.0.0", "01.0.0", "1.0.0.0", ""] {
            assert!(validate_version(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut it = item();
        it.apply(RoadmapItemPatch {
            description: Some("Pay for an order".into()),
            risk: Some(Risk::High),
            ..Default::default()
        });
        assert_eq!(it.title, "Checkout");
        assert_eq!(it.description, "Pay for an order");
        assert_eq!(it.risk, Risk::High);
    }

    #[test]
    fn self_critique_reads_project_settings() {
        let now = Utc::now();
        let mut p = Project {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "p".into(),
            description: String::new(),
            settings: serde_json::json!({}),
            mcp_config: serde_json::json!({}),
            alignment_score: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!p.self_critique_enabled());
        p.settings = serde_json::json!({"self_critique": true});
        assert!(p.self_critique_enabled());
    }

    #[test]
    fn contract_defaults_fill_schemas() {
        let c: NewContract = serde_json::from_str(r#"{"contract_type":"REST"}"#).unwrap();
        assert_eq!(c.version, "1.0.0");
        assert!(c.backward_compatible);
        assert!(c.output_schema.is_none());
    }
}
