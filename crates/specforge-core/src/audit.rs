//! Audit trail emission.
//!
//! Audit is best-effort: a failed append is logged and swallowed so the
//! mutation it describes is never reversed.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::model::AuditRecord;

pub trait AuditSink {
    fn append_audit(&self, record: &AuditRecord) -> Result<()>;
}

/// One mutation as seen by the audit log.
#[derive(Debug, Clone)]
pub struct AuditEvent<'a> {
    pub project_id: Option<Uuid>,
    pub entity_type: &'a str,
    pub entity_id: Uuid,
    pub action: &'a str,
    pub actor: Option<Uuid>,
    pub changes: Value,
}

impl AuditEvent<'_> {
    pub fn into_record(self) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            project_id: self.project_id,
            entity_type: self.entity_type.to_string(),
            entity_id: self.entity_id,
            action: self.action.to_string(),
            actor: self.actor,
            changes: self.changes,
            created_at: Utc::now(),
        }
    }
}

/// Append `event`, logging instead of failing.
pub fn emit<S: AuditSink + ?Sized>(sink: &S, event: AuditEvent<'_>) {
    let entity_type = event.entity_type.to_string();
    let entity_id = event.entity_id;
    let action = event.action.to_string();
    if let Err(e) = sink.append_audit(&event.into_record()) {
        tracing::warn!(
            entity_type = %entity_type,
            entity_id = %entity_id,
            action = %action,
            "audit append failed: {e}"
        );
    }
}
