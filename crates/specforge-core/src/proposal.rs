//! AI change proposals against a roadmap item.

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SpecError};
use crate::model::{AiProposal, NewProposal, RoadmapItem, RoadmapItemPatch};
use crate::types::ProposalStatus;

/// Roadmap item fields a proposal may change.
pub const MUTABLE_FIELDS: &[&str] = &[
    "title",
    "description",
    "business_context",
    "technical_context",
    "priority",
    "risk",
    "breaking_change",
    "regression_sensitive",
];

pub fn new_proposal(roadmap_item_id: Uuid, input: NewProposal, created_by: Option<Uuid>) -> Result<AiProposal> {
    if input.changes.is_empty() {
        return Err(SpecError::MissingField("changes".into()));
    }
    Ok(AiProposal {
        id: Uuid::new_v4(),
        roadmap_item_id,
        changes: input.changes,
        rationale: input.rationale,
        status: ProposalStatus::Pending,
        created_by,
        decided_by: None,
        created_at: Utc::now(),
        decided_at: None,
    })
}

/// Shallow-apply the mutable subset of `changes`; other keys are ignored.
/// Returns the names of the fields that were applied.
pub fn apply_changes(item: &mut RoadmapItem, changes: &Map<String, Value>) -> Result<Vec<String>> {
    let subset: Map<String, Value> = changes
        .iter()
        .filter(|(k, _)| MUTABLE_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let applied = subset.keys().cloned().collect();
    let patch: RoadmapItemPatch = serde_json::from_value(Value::Object(subset))
        .map_err(|e| SpecError::InvalidRequest(format!("proposal changes: {e}")))?;
    item.apply(patch);
    Ok(applied)
}

/// Record a decision on a pending proposal.
pub fn decide(proposal: &mut AiProposal, approve: bool, actor: Option<Uuid>) -> Result<()> {
    let next = if approve {
        ProposalStatus::Approved
    } else {
        ProposalStatus::Rejected
    };
    if proposal.status != ProposalStatus::Pending {
        return Err(SpecError::InvalidTransition {
            from: proposal.status.to_string(),
            to: next.to_string(),
        });
    }
    proposal.status = next;
    proposal.decided_by = actor;
    proposal.decided_at = Some(Utc::now());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, Risk, RoadmapKind, RoadmapStatus};
    use serde_json::json;

    fn item() -> RoadmapItem {
        let now = Utc::now();
        RoadmapItem {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            kind: RoadmapKind::Task,
            title: "Rate limit".into(),
            description: String::new(),
            business_context: String::new(),
            technical_context: String::new(),
            priority: Priority::Low,
            risk: Risk::Low,
            status: RoadmapStatus::Draft,
            breaking_change: false,
            regression_sensitive: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn changes(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn applies_only_mutable_fields() {
        let mut it = item();
        let applied = apply_changes(
            &mut it,
            &changes(json!({"description": "token bucket", "priority": "HIGH", "status": "COMPLETE", "id": "x"})),
        )
        .unwrap();
        assert_eq!(it.description, "token bucket");
        assert_eq!(it.priority, Priority::High);
        assert_eq!(it.status, RoadmapStatus::Draft);
        assert_eq!(applied, vec!["description", "priority"]);
    }

    #[test]
    fn bad_enum_value_is_invalid_request() {
        let mut it = item();
        let err = apply_changes(&mut it, &changes(json!({"risk": "EXTREME"}))).unwrap_err();
        assert!(matches!(err, SpecError::InvalidRequest(_)));
    }

    #[test]
    fn decided_proposal_rejects_second_decision() {
        let mut p = new_proposal(
            Uuid::new_v4(),
            NewProposal {
                changes: changes(json!({"title": "t"})),
                rationale: String::new(),
            },
            None,
        )
        .unwrap();
        decide(&mut p, false, None).unwrap();
        assert_eq!(p.status, ProposalStatus::Rejected);
        assert!(p.decided_at.is_some());
        assert!(matches!(
            decide(&mut p, true, None),
            Err(SpecError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn empty_changes_are_refused() {
        let err = new_proposal(
            Uuid::new_v4(),
            NewProposal {
                changes: Map::new(),
                rationale: String::new(),
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::MissingField(_)));
    }
}
