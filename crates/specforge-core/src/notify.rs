use serde_json::Value;
use uuid::Uuid;

pub const FEATURE_SCORE_UPDATED: &str = "FEATURE_SCORE_UPDATED";
pub const ALIGNMENT_COMPLETED: &str = "ALIGNMENT_COMPLETED";
pub const PROPOSAL_DECIDED: &str = "PROPOSAL_DECIDED";

/// Push channel to connected clients. Delivery is best-effort.
pub trait Notifier: Send + Sync {
    fn broadcast(&self, event_type: &str, payload: Value);
    fn notify_user(&self, user_id: Uuid, event_type: &str, payload: Value);
}

/// Drops every event. Used when no client transport is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn broadcast(&self, _event_type: &str, _payload: Value) {}
    fn notify_user(&self, _user_id: Uuid, _event_type: &str, _payload: Value) {}
}
