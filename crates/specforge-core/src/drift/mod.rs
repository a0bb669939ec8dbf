//! Contract drift engine.
//!
//! Structural comparison of two canonicalised OpenAPI 3.1 documents (or bare
//! JSON Schemas). The engine is a pure, total function: equal inputs always
//! yield equal reports, including item order.

mod openapi;
mod schema;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftSeverity {
    Critical,
    Breaking,
    Warning,
    Info,
}

impl DriftSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            DriftSeverity::Critical => "CRITICAL",
            DriftSeverity::Breaking => "BREAKING",
            DriftSeverity::Warning => "WARNING",
            DriftSeverity::Info => "INFO",
        }
    }
}

impl fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftType {
    PathRemoved,
    MethodRemoved,
    RequiredFieldRemoved,
    EnumValueRemoved,
    ResponseRemoved,
    MediaTypeRemoved,
    FieldTypeChanged,
    ConstraintTightened,
    RequiredFieldAdded,
    FieldRemoved,
    FieldAdded,
    NewPath,
    NewMethod,
    NewResponse,
    MediaTypeAdded,
    ConstraintLoosened,
    EnumValueAdded,
    MetadataChanged,
}

impl DriftType {
    pub fn as_str(self) -> &'static str {
        match self {
            DriftType::PathRemoved => "PATH_REMOVED",
            DriftType::MethodRemoved => "METHOD_REMOVED",
            DriftType::RequiredFieldRemoved => "REQUIRED_FIELD_REMOVED",
            DriftType::EnumValueRemoved => "ENUM_VALUE_REMOVED",
            DriftType::ResponseRemoved => "RESPONSE_REMOVED",
            DriftType::MediaTypeRemoved => "MEDIA_TYPE_REMOVED",
            DriftType::FieldTypeChanged => "FIELD_TYPE_CHANGED",
            DriftType::ConstraintTightened => "CONSTRAINT_TIGHTENED",
            DriftType::RequiredFieldAdded => "REQUIRED_FIELD_ADDED",
            DriftType::FieldRemoved => "FIELD_REMOVED",
            DriftType::FieldAdded => "FIELD_ADDED",
            DriftType::NewPath => "NEW_PATH",
            DriftType::NewMethod => "NEW_METHOD",
            DriftType::NewResponse => "NEW_RESPONSE",
            DriftType::MediaTypeAdded => "MEDIA_TYPE_ADDED",
            DriftType::ConstraintLoosened => "CONSTRAINT_LOOSENED",
            DriftType::EnumValueAdded => "ENUM_VALUE_ADDED",
            DriftType::MetadataChanged => "METADATA_CHANGED",
        }
    }

    /// Deterministic severity for each drift type.
    pub fn severity(self) -> DriftSeverity {
        match self {
            DriftType::PathRemoved
            | DriftType::MethodRemoved
            | DriftType::RequiredFieldRemoved
            | DriftType::EnumValueRemoved
            | DriftType::ResponseRemoved
            | DriftType::MediaTypeRemoved
            | DriftType::FieldTypeChanged => DriftSeverity::Critical,
            DriftType::ConstraintTightened
            | DriftType::RequiredFieldAdded
            | DriftType::FieldRemoved => DriftSeverity::Breaking,
            DriftType::FieldAdded
            | DriftType::NewPath
            | DriftType::NewMethod
            | DriftType::NewResponse
            | DriftType::MediaTypeAdded
            | DriftType::ConstraintLoosened
            | DriftType::EnumValueAdded => DriftSeverity::Warning,
            DriftType::MetadataChanged => DriftSeverity::Info,
        }
    }
}

impl fmt::Display for DriftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftItem {
    #[serde(rename = "type")]
    pub drift_type: DriftType,
    pub severity: DriftSeverity,
    /// Dotted location inside the document, e.g.
    /// `paths./users.get.responses.200.content.application/json.schema.properties.id`.
    pub location: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftCounts {
    pub critical: usize,
    pub breaking: usize,
    pub warning: usize,
    pub info: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftPolicy {
    #[serde(default = "default_block_on_critical")]
    pub block_on_critical: bool,
    #[serde(default)]
    pub block_on_breaking: bool,
}

fn default_block_on_critical() -> bool {
    true
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            block_on_critical: true,
            block_on_breaking: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub items: Vec<DriftItem>,
    pub counts: DriftCounts,
    pub blocked: bool,
}

impl DriftReport {
    pub fn of_type(&self, ty: DriftType) -> impl Iterator<Item = &DriftItem> {
        self.items.iter().filter(move |i| i.drift_type == ty)
    }
}

// ---------------------------------------------------------------------------
// Collector shared by the path and schema walks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Collector {
    items: Vec<DriftItem>,
}

impl Collector {
    pub(crate) fn push(
        &mut self,
        drift_type: DriftType,
        location: &str,
        message: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) {
        self.items.push(DriftItem {
            drift_type,
            severity: drift_type.severity(),
            location: location.to_string(),
            message: message.into(),
            old_value,
            new_value,
        });
    }
}

pub(crate) fn join(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}.{segment}")
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Compare two documents and classify every structural change.
///
/// A document with `paths` is walked as an OpenAPI document (paths,
/// operations, security, components). A document with neither `paths` nor
/// `components` is compared as a single schema.
pub fn compare(baseline: &Value, proposed: &Value, policy: &DriftPolicy) -> DriftReport {
    let mut out = Collector::default();

    if is_openapi(baseline) || is_openapi(proposed) {
        openapi::walk_document(baseline, proposed, &mut out);
    } else {
        schema::walk(baseline, proposed, "", &mut out);
    }

    finish(out.items, policy)
}

/// Compare two bare JSON Schemas rooted at `location`.
pub fn compare_schemas(
    baseline: &Value,
    proposed: &Value,
    location: &str,
    policy: &DriftPolicy,
) -> DriftReport {
    let mut out = Collector::default();
    schema::walk(baseline, proposed, location, &mut out);
    finish(out.items, policy)
}

fn is_openapi(doc: &Value) -> bool {
    doc.get("paths").is_some() || doc.get("components").is_some() || doc.get("openapi").is_some()
}

fn finish(mut items: Vec<DriftItem>, policy: &DriftPolicy) -> DriftReport {
    items.sort_by(|a, b| {
        a.location
            .cmp(&b.location)
            .then_with(|| a.drift_type.as_str().cmp(b.drift_type.as_str()))
            .then_with(|| value_key(&a.old_value).cmp(&value_key(&b.old_value)))
            .then_with(|| value_key(&a.new_value).cmp(&value_key(&b.new_value)))
    });

    let counts = tally(&items);
    let blocked = (policy.block_on_critical && counts.critical > 0)
        || (policy.block_on_breaking && counts.breaking > 0);

    DriftReport {
        items,
        counts,
        blocked,
    }
}

fn value_key(v: &Option<Value>) -> String {
    v.as_ref().map(Value::to_string).unwrap_or_default()
}

fn tally(items: &[DriftItem]) -> DriftCounts {
    let mut c = DriftCounts {
        total: items.len(),
        ..Default::default()
    };
    for item in items {
        match item.severity {
            DriftSeverity::Critical => c.critical += 1,
            DriftSeverity::Breaking => c.breaking += 1,
            DriftSeverity::Warning => c.warning += 1,
            DriftSeverity::Info => c.info += 1,
        }
    }
    c
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_doc(required: Value) -> Value {
        json!({
            "properties": {
                "User": {
                    "type": "object",
                    "required": required,
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"}
                    }
                }
            }
        })
    }

    #[test]
    fn required_field_removed_blocks_under_critical_policy() {
        let baseline = user_doc(json!(["id", "name"]));
        let proposed = user_doc(json!(["id"]));
        let policy = DriftPolicy {
            block_on_critical: true,
            block_on_breaking: false,
        };
        let report = compare(&baseline, &proposed, &policy);

        let removed: Vec<_> = report.of_type(DriftType::RequiredFieldRemoved).collect();
        assert!(!removed.is_empty());
        assert_eq!(removed[0].severity, DriftSeverity::Critical);
        assert_eq!(removed[0].old_value, Some(json!("name")));
        assert!(report.blocked);
    }

    #[test]
    fn enum_narrowing_reports_single_removal() {
        let baseline = json!({"type": "string", "enum": ["pending", "active", "deleted"]});
        let proposed = json!({"type": "string", "enum": ["pending", "active"]});
        let report = compare(&baseline, &proposed, &DriftPolicy::default());

        let removed: Vec<_> = report.of_type(DriftType::EnumValueRemoved).collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].old_value, Some(json!("deleted")));
        assert_eq!(removed[0].severity, DriftSeverity::Critical);
        assert_eq!(report.counts.total, 1);
    }

    #[test]
    fn identical_documents_produce_empty_report() {
        let doc = user_doc(json!(["id"]));
        let report = compare(&doc, &doc, &DriftPolicy::default());
        assert!(report.items.is_empty());
        assert!(!report.blocked);
        assert_eq!(report.counts, DriftCounts::default());
    }

    #[test]
    fn empty_schemas_are_a_no_op() {
        let report = compare(&json!({}), &json!({}), &DriftPolicy::default());
        assert!(report.items.is_empty());
    }

    #[test]
    fn comparison_is_deterministic() {
        let a = json!({
            "type": "object",
            "required": ["a", "b", "c"],
            "properties": {
                "a": {"type": "string", "maxLength": 10},
                "b": {"type": "integer", "enum": [1, 2, 3]},
                "c": {"type": "number"}
            }
        });
        let b = json!({
            "type": "object",
            "required": ["a", "d"],
            "properties": {
                "a": {"type": "string", "maxLength": 5},
                "b": {"type": "string"},
                "d": {"type": "boolean"}
            }
        });
        let first = compare(&a, &b, &DriftPolicy::default());
        let second = compare(&a, &b, &DriftPolicy::default());
        assert_eq!(first, second);

        let mut sorted = first.items.clone();
        sorted.sort_by(|x, y| {
            x.location
                .cmp(&y.location)
                .then_with(|| x.drift_type.as_str().cmp(y.drift_type.as_str()))
        });
        let order: Vec<_> = first.items.iter().map(|i| (&i.location, i.drift_type)).collect();
        let expected: Vec<_> = sorted.iter().map(|i| (&i.location, i.drift_type)).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn reversed_comparison_mirrors_removals_as_additions() {
        let a = json!({
            "paths": {
                "/p": {"get": {"responses": {"200": {"description": "ok"}}}},
                "/q": {"get": {"responses": {"200": {"description": "ok"}}}}
            }
        });
        let b = json!({
            "paths": {
                "/q": {"get": {"responses": {"200": {"description": "ok"}}}}
            }
        });
        let forward = compare(&a, &b, &DriftPolicy::default());
        let backward = compare(&b, &a, &DriftPolicy::default());

        let removed: Vec<_> = forward.of_type(DriftType::PathRemoved).collect();
        let added: Vec<_> = backward.of_type(DriftType::NewPath).collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(added.len(), 1);
        assert_eq!(removed[0].location, added[0].location);
    }

    #[test]
    fn enum_and_field_changes_mirror() {
        let a = json!({
            "type": "object",
            "properties": {"status": {"type": "string", "enum": ["x", "y"]}}
        });
        let b = json!({
            "type": "object",
            "properties": {
                "status": {"type": "string", "enum": ["x"]},
                "extra": {"type": "string"}
            }
        });
        let forward = compare(&a, &b, &DriftPolicy::default());
        let backward = compare(&b, &a, &DriftPolicy::default());

        assert_eq!(forward.of_type(DriftType::EnumValueRemoved).count(), 1);
        assert_eq!(backward.of_type(DriftType::EnumValueAdded).count(), 1);
        assert_eq!(forward.of_type(DriftType::FieldAdded).count(), 1);
        assert_eq!(backward.of_type(DriftType::FieldRemoved).count(), 1);
    }

    #[test]
    fn breaking_policy_blocks_on_breaking_only_changes() {
        let a = json!({"type": "string"});
        let b = json!({"type": "string", "maxLength": 8});
        let lenient = compare(&a, &b, &DriftPolicy::default());
        assert_eq!(lenient.counts.breaking, 1);
        assert!(!lenient.blocked);

        let strict = compare(
            &a,
            &b,
            &DriftPolicy {
                block_on_critical: true,
                block_on_breaking: true,
            },
        );
        assert!(strict.blocked);
    }

    #[test]
    fn policy_deserialises_from_camel_case() {
        let p: DriftPolicy = serde_json::from_str(r#"{"blockOnBreaking":true}"#).unwrap();
        assert!(p.block_on_critical);
        assert!(p.block_on_breaking);
    }

    #[test]
    fn severity_table() {
        assert_eq!(DriftType::PathRemoved.severity(), DriftSeverity::Critical);
        assert_eq!(DriftType::FieldTypeChanged.severity(), DriftSeverity::Critical);
        assert_eq!(DriftType::RequiredFieldAdded.severity(), DriftSeverity::Breaking);
        assert_eq!(DriftType::ConstraintTightened.severity(), DriftSeverity::Breaking);
        assert_eq!(DriftType::NewMethod.severity(), DriftSeverity::Warning);
        assert_eq!(DriftType::EnumValueAdded.severity(), DriftSeverity::Warning);
        assert_eq!(DriftType::MetadataChanged.severity(), DriftSeverity::Info);
    }
}
