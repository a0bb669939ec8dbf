use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use specforge_core::notify::Notifier;

/// Per-connection outbound buffer.
const SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    id: u64,
    user_id: Uuid,
    tx: mpsc::Sender<String>,
}

/// Fan-out of `{type, payload}` envelopes to connected WebSocket clients.
///
/// Register/unregister take the write lock briefly; sends hold the read
/// lock while iterating. A subscriber whose buffer is full or closed is
/// dropped after the send pass.
#[derive(Default)]
pub struct NotificationHub {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: Uuid) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber { id, user_id, tx });
        tracing::debug!(subscriber = id, user_id = %user_id, "notification subscriber registered");
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn send_where(&self, event_type: &str, payload: Value, matches: impl Fn(&Subscriber) -> bool) {
        let message = serde_json::json!({ "type": event_type, "payload": payload }).to_string();
        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for sub in subscribers.iter().filter(|s| matches(s)) {
                if sub.tx.try_send(message.clone()).is_err() {
                    dead.push(sub.id);
                }
            }
        }
        for id in dead {
            tracing::warn!(subscriber = id, "dropping unresponsive notification subscriber");
            self.unregister(id);
        }
    }
}

impl Notifier for NotificationHub {
    fn broadcast(&self, event_type: &str, payload: Value) {
        self.send_where(event_type, payload, |_| true);
    }

    fn notify_user(&self, user_id: Uuid, event_type: &str, payload: Value) {
        self.send_where(event_type, payload, |s| s.user_id == user_id);
    }
}
