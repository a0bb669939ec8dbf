//! Background worker that drives one refinement session to a terminal state.
//!
//! ```text
//! POST /projects/{id}/refinement
//!     │  persist session (IN_PROGRESS), open queue, spawn worker
//!     ▼
//! run_session ── generate ── extract JSON ── critique? ── VALIDATED
//!     │                │             │            │
//!     │                └─ transport  └─ retry     └─ feedback prompt, or
//!     │                   error or       (WARN)      retry when unreadable
//!     │                   shutdown: FAILED
//!     ▼
//! RefinementEvent queue (cap 100) ──► GET /refinement/{id}/events (SSE)
//! ```
//!
//! The worker owns the sending half; dropping it closes the stream. A lost
//! subscriber never stops the worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use llm_client::LlmClient;
use specforge_core::refinement::{
    critique_prompt, extract_json, feedback_prompt, initial_prompt, Critique, EventKind, RefinementEvent,
    RefinementSession, STRICT_JSON_INSTRUCTION,
};
use specforge_core::Service;

pub const EVENT_QUEUE_CAPACITY: usize = 100;
/// Ceiling on how long one subscriber may wait on a stream.
pub const SUBSCRIBER_WAIT: Duration = Duration::from_secs(300);
/// Safety timeout for a single LLM round trip.
pub const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(120);

struct Queue {
    rx: mpsc::Receiver<RefinementEvent>,
    finished_at: Option<Instant>,
}

fn prune(queues: &mut HashMap<Uuid, Queue>, retention: Duration) {
    queues.retain(|_, q| q.finished_at.map_or(true, |at| at.elapsed() < retention));
}

/// Receiving halves of session queues, waiting for their subscriber. A
/// queue whose worker has finished is kept for `retention` so a late
/// subscriber still sees the buffered events, then dropped.
pub struct RefinementRegistry {
    queues: Mutex<HashMap<Uuid, Queue>>,
    retention: Duration,
}

impl Default for RefinementRegistry {
    fn default() -> Self {
        Self::with_retention(SUBSCRIBER_WAIT)
    }
}

impl RefinementRegistry {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Lock the map, dropping finished queues past their retention.
    fn queues(&self) -> MutexGuard<'_, HashMap<Uuid, Queue>> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut queues, self.retention);
        queues
    }

    /// Open a queue for `session_id` and return its sending half.
    pub fn open(&self, session_id: Uuid) -> mpsc::Sender<RefinementEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        self.queues().insert(session_id, Queue { rx, finished_at: None });
        tx
    }

    /// Hand the queue to its single subscriber.
    pub fn take(&self, session_id: Uuid) -> Option<mpsc::Receiver<RefinementEvent>> {
        self.queues().remove(&session_id).map(|q| q.rx)
    }

    /// Called by the worker on exit; starts the retention clock.
    pub fn finish(&self, session_id: Uuid) {
        let mut queues = self.queues();
        if let Some(q) = queues.get_mut(&session_id) {
            q.finished_at = Some(Instant::now());
        }
        prune(&mut queues, self.retention);
    }

    /// Queues still waiting for a subscriber.
    pub fn pending(&self) -> usize {
        self.queues().len()
    }
}

/// Sending side of a session queue. Once a send fails the emitter goes
/// quiet so a subscriber always sees a prefix of the emitted sequence.
struct Emitter {
    tx: mpsc::Sender<RefinementEvent>,
    open: bool,
}

impl Emitter {
    fn emit(&mut self, event: RefinementEvent) {
        if !self.open {
            return;
        }
        if let Err(e) = self.tx.try_send(event) {
            tracing::debug!("refinement event queue unavailable: {e}");
            self.open = false;
        }
    }
}

async fn persist(service: &Arc<Service>, session: &RefinementSession) {
    let service = service.clone();
    let snapshot = session.clone();
    let result = tokio::task::spawn_blocking(move || service.save_refinement(&snapshot)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(session_id = %session.id, "failed to persist refinement session: {e}"),
        Err(e) => tracing::warn!(session_id = %session.id, "refinement persist task failed: {e}"),
    }
}

async fn fail(service: &Arc<Service>, session: &mut RefinementSession, out: &mut Emitter, iteration: u32, reason: String) {
    if let Err(e) = session.fail(reason.clone()) {
        tracing::warn!(session_id = %session.id, "cannot fail refinement session: {e}");
    }
    persist(service, session).await;
    out.emit(RefinementEvent::new(EventKind::Error, iteration, reason));
}

async fn generate(llm: &dyn LlmClient, prompt: &str, cancel: &CancellationToken) -> Result<String, String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err("refinement cancelled: server shutting down".to_string()),
        res = tokio::time::timeout(LLM_CALL_TIMEOUT, llm.generate(prompt)) => match res {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(format!("LLM request failed: {e}")),
            Err(_) => Err(format!("LLM request timed out after {}s", LLM_CALL_TIMEOUT.as_secs())),
        },
    }
}

/// Drive `session` until VALIDATED or FAILED. Cancelling `cancel` fails the
/// session at its next LLM call.
pub async fn run_session(
    service: Arc<Service>,
    llm: Arc<dyn LlmClient>,
    mut session: RefinementSession,
    self_critique: bool,
    tx: mpsc::Sender<RefinementEvent>,
    cancel: CancellationToken,
) -> RefinementSession {
    let mut out = Emitter { tx, open: true };
    let target = session.target_type;
    let base = initial_prompt(target, &session.prompt, &session.context);
    let mut prompt = base.clone();

    out.emit(
        RefinementEvent::new(EventKind::Info, 0, "refinement started").with_data(json!({
            "session_id": session.id,
            "max_iterations": session.max_iterations,
            "self_critique": self_critique,
        })),
    );

    for iteration in 1..=session.max_iterations {
        session.current_iteration = iteration;
        session.updated_at = chrono::Utc::now();
        persist(&service, &session).await;
        out.emit(RefinementEvent::new(
            EventKind::IterationStart,
            iteration,
            format!("iteration {iteration} of {}", session.max_iterations),
        ));

        out.emit(RefinementEvent::new(EventKind::Step, iteration, "requesting artifact"));
        let raw = match generate(llm.as_ref(), &prompt, &cancel).await {
            Ok(raw) => raw,
            Err(reason) => {
                fail(&service, &mut session, &mut out, iteration, reason).await;
                return session;
            }
        };
        tracing::debug!(session_id = %session.id, iteration, raw = %raw, "llm response");

        let artifact = match extract_json(&raw) {
            Ok(v) => v,
            Err(e) => {
                out.emit(RefinementEvent::new(
                    EventKind::Warn,
                    iteration,
                    format!("response was not valid JSON: {e}"),
                ));
                prompt = format!("{base}\n\n{STRICT_JSON_INSTRUCTION}");
                continue;
            }
        };

        let mut errors = Vec::new();
        let mut confidence = 1.0;
        if self_critique {
            out.emit(RefinementEvent::new(EventKind::Step, iteration, "self-critique"));
            let raw = match generate(llm.as_ref(), &critique_prompt(target, &artifact), &cancel).await {
                Ok(raw) => raw,
                Err(reason) => {
                    fail(&service, &mut session, &mut out, iteration, reason).await;
                    return session;
                }
            };
            tracing::debug!(session_id = %session.id, iteration, raw = %raw, "critique response");
            let critique = match Critique::parse(&raw) {
                Ok(critique) => critique,
                Err(e) => {
                    // An unreadable critique never validates; the iteration is spent.
                    out.emit(RefinementEvent::new(
                        EventKind::Warn,
                        iteration,
                        format!("critique could not be read, retrying: {e}"),
                    ));
                    continue;
                }
            };
            confidence = critique.confidence();
            if !critique.passes() {
                errors = critique.findings();
                out.emit(
                    RefinementEvent::new(EventKind::Warn, iteration, format!("critique scored {}", critique.score))
                        .with_data(json!(critique)),
                );
            }
        }

        if errors.is_empty() {
            if let Err(e) = session.validate(artifact.clone(), confidence) {
                tracing::warn!(session_id = %session.id, "cannot validate refinement session: {e}");
            }
            persist(&service, &session).await;
            tracing::info!(session_id = %session.id, iteration, confidence, "refinement validated");
            out.emit(
                RefinementEvent::new(EventKind::Success, iteration, "artifact validated")
                    .with_data(json!({ "result": artifact, "confidence": confidence })),
            );
            return session;
        }

        prompt = feedback_prompt(&base, &artifact, &errors);
    }

    let iterations = session.max_iterations;
    tracing::info!(session_id = %session.id, iterations, "refinement exhausted its iterations");
    fail(
        &service,
        &mut session,
        &mut out,
        iterations,
        format!("no valid artifact after {iterations} iterations"),
    )
    .await;
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_client::{LlmError, ScriptedClient};
    use specforge_core::model::NewProject;
    use specforge_core::notify::NoopNotifier;
    use specforge_core::refinement::{NewRefinement, TargetType};
    use specforge_core::types::RefinementStatus;
    use specforge_core::Store;
    use tempfile::TempDir;

    fn setup(max_iterations: u32) -> (TempDir, Arc<Service>, RefinementSession) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("sf.redb")).unwrap();
        let service = Arc::new(Service::new(Arc::new(store), Arc::new(NoopNotifier)));
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
        let session = RefinementSession::new(
            project.id,
            NewRefinement {
                target_type: TargetType::Contract,
                prompt: "design a login contract".into(),
                context: json!({}),
                max_iterations: Some(max_iterations),
            },
            None,
        )
        .unwrap();
        service.save_refinement(&session).unwrap();
        (dir, service, session)
    }

    async fn drain(mut rx: mpsc::Receiver<RefinementEvent>) -> Vec<RefinementEvent> {
        let mut out = Vec::new();
        while let Some(e) = rx.recv().await {
            out.push(e);
        }
        out
    }

    fn kinds(events: &[RefinementEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn happy_path_validates_in_one_iteration() {
        let (_dir, service, session) = setup(3);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let llm = Arc::new(ScriptedClient::new([r#"{"name": "login", "version": "1.0.0"}"#]));

        let done = run_session(service.clone(), llm, session.clone(), false, tx, CancellationToken::new()).await;
        assert_eq!(done.status, RefinementStatus::Validated);
        assert_eq!(done.confidence, Some(1.0));

        let events = drain(rx).await;
        let starts = events.iter().filter(|e| e.kind == EventKind::IterationStart).count();
        assert_eq!(starts, 1);
        assert_eq!(events.last().unwrap().kind, EventKind::Success);

        let stored = service.refinement(session.id).unwrap();
        assert_eq!(stored.status, RefinementStatus::Validated);
        assert_eq!(stored.result.unwrap()["name"], "login");
    }

    #[tokio::test]
    async fn unparsable_reply_retries_with_strict_instruction() {
        let (_dir, service, session) = setup(3);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let llm = Arc::new(ScriptedClient::new(["Sure! Here you go", "```json\n{\"ok\": true}\n```"]));

        let done = run_session(service, llm.clone(), session, false, tx, CancellationToken::new()).await;
        assert_eq!(done.status, RefinementStatus::Validated);
        assert_eq!(done.current_iteration, 2);
        assert!(llm.prompts()[1].contains("raw JSON only"));
        assert!(kinds(&drain(rx).await).contains(&EventKind::Warn));
    }

    #[tokio::test]
    async fn low_critique_feeds_back_then_passes() {
        let (_dir, service, session) = setup(3);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let llm = Arc::new(ScriptedClient::new([
            r#"{"name": "login"}"#,
            r#"{"score": 4, "missing_constraints": ["no error schema"]}"#,
            r#"{"name": "login", "error_schema": {}}"#,
            r#"{"score": 8}"#,
        ]));

        let done = run_session(service, llm.clone(), session, true, tx, CancellationToken::new()).await;
        assert_eq!(done.status, RefinementStatus::Validated);
        assert_eq!(done.confidence, Some(0.8));
        assert!(llm.prompts()[2].contains("missing constraint: no error schema"));
        let events = drain(rx).await;
        assert_eq!(
            events.iter().filter(|e| e.kind == EventKind::IterationStart).count(),
            2
        );
    }

    #[tokio::test]
    async fn exhausted_iterations_fail() {
        let (_dir, service, session) = setup(2);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let llm = Arc::new(ScriptedClient::new(["nope", "still nope"]));

        let done = run_session(service, llm, session, false, tx, CancellationToken::new()).await;
        assert_eq!(done.status, RefinementStatus::Failed);
        assert_eq!(drain(rx).await.last().unwrap().kind, EventKind::Error);
    }

    #[tokio::test]
    async fn transport_error_fails_immediately() {
        let (_dir, service, session) = setup(3);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let llm = Arc::new(ScriptedClient::new(Vec::<String>::new()));
        llm.push_error(LlmError::Status {
            status: 503,
            body: "down".into(),
        });

        let done = run_session(service, llm.clone(), session, false, tx, CancellationToken::new()).await;
        assert_eq!(done.status, RefinementStatus::Failed);
        assert_eq!(done.current_iteration, 1);
        assert_eq!(llm.prompts().len(), 1);
        assert_eq!(drain(rx).await.last().unwrap().kind, EventKind::Error);
    }

    #[tokio::test]
    async fn lost_subscriber_does_not_stop_worker() {
        let (_dir, service, session) = setup(1);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        drop(rx);
        let llm = Arc::new(ScriptedClient::new(["{}"]));
        let done = run_session(service, llm, session, false, tx, CancellationToken::new()).await;
        assert_eq!(done.status, RefinementStatus::Validated);
    }

    #[tokio::test]
    async fn unreadable_critique_spends_the_iteration() {
        let (_dir, service, session) = setup(2);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let llm = Arc::new(ScriptedClient::new([
            r#"{"name": "login"}"#,
            "the critic is offline",
            r#"{"name": "login"}"#,
            "still no verdict",
        ]));

        let done = run_session(service, llm.clone(), session, true, tx, CancellationToken::new()).await;
        assert_eq!(done.status, RefinementStatus::Failed);
        assert!(done.result.is_none());
        assert_eq!(llm.prompts().len(), 4);
        let events = drain(rx).await;
        assert!(!kinds(&events).contains(&EventKind::Success));
        assert_eq!(events.last().unwrap().kind, EventKind::Error);
    }

    #[tokio::test]
    async fn unreadable_critique_then_passing_one_validates() {
        let (_dir, service, session) = setup(3);
        let (tx, _rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let llm = Arc::new(ScriptedClient::new([
            r#"{"name": "login"}"#,
            "no idea",
            r#"{"name": "login"}"#,
            r#"{"score": 7.5}"#,
        ]));

        let done = run_session(service, llm, session, true, tx, CancellationToken::new()).await;
        assert_eq!(done.status, RefinementStatus::Validated);
        assert_eq!(done.current_iteration, 2);
        assert_eq!(done.confidence, Some(0.75));
    }

    #[tokio::test]
    async fn cancellation_fails_the_session() {
        let (_dir, service, session) = setup(3);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let llm = Arc::new(ScriptedClient::new(["{}"]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let done = run_session(service.clone(), llm.clone(), session.clone(), false, tx, cancel).await;
        assert_eq!(done.status, RefinementStatus::Failed);
        assert!(llm.prompts().is_empty());
        let last = drain(rx).await.pop().unwrap();
        assert!(last.message.contains("shutting down"));
        assert_eq!(service.refinement(session.id).unwrap().status, RefinementStatus::Failed);
    }

    #[test]
    fn registry_hands_queue_out_once() {
        let registry = RefinementRegistry::default();
        let id = Uuid::new_v4();
        let _tx = registry.open(id);
        assert!(registry.take(id).is_some());
        assert!(registry.take(id).is_none());
    }

    #[test]
    fn finished_queue_waits_for_late_subscriber() {
        let registry = RefinementRegistry::default();
        let id = Uuid::new_v4();
        let _tx = registry.open(id);
        registry.finish(id);
        assert_eq!(registry.pending(), 1);
        assert!(registry.take(id).is_some());
    }

    #[test]
    fn unclaimed_queue_is_dropped_after_retention() {
        let registry = RefinementRegistry::with_retention(Duration::ZERO);
        let running = Uuid::new_v4();
        let finished = Uuid::new_v4();
        let _a = registry.open(running);
        let _b = registry.open(finished);
        registry.finish(finished);
        assert_eq!(registry.pending(), 1);
        assert!(registry.take(finished).is_none());
        assert!(registry.take(running).is_some());
    }
}
