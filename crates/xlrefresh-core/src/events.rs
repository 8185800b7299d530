//! Refresh event types, envelope, and event bus for run observability.
//!
//! The orchestrator emits [`RefreshEvent`]s while a run progresses. Consumers
//! (the SSE endpoint, tests, the CLI's `--wait` mode through the API)
//! subscribe independently to the broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{BatchSummary, FileReport, PostPassSkip};

// ============================================================================
// Event Envelope
// ============================================================================

/// Event wrapper carrying identity and timing metadata.
///
/// ## Wire Format (SSE)
///
/// ```text
/// event: file.finished
/// data: {"event_id":"...","event_type":"file.finished","occurred_at":"...","payload":{...}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type (e.g., `"run.started"`).
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Domain-specific event data.
    pub payload: RefreshEvent,
}

impl EventEnvelope {
    pub fn new(event: RefreshEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type().to_string(),
            occurred_at: Utc::now(),
            payload: event,
        }
    }
}

// ============================================================================
// Refresh Event (domain payloads)
// ============================================================================

/// Which pacing wait the orchestrator entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// Pause after a file in the main pass.
    InterFile,
    /// Fixed wait before the master-file post-pass.
    Settle,
}

/// Progress events of a refresh run, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshEvent {
    /// A run captured its registry snapshot.
    RunStarted { run_id: Uuid, file_count: usize },
    /// The engine started on a file of the main pass.
    FileStarted {
        run_id: Uuid,
        index: usize,
        path: String,
    },
    /// The engine finished a file (any outcome).
    FileFinished { run_id: Uuid, report: FileReport },
    /// The orchestrator entered a pacing wait.
    Waiting {
        run_id: Uuid,
        kind: WaitKind,
        seconds: u64,
    },
    /// The master-file post-pass started.
    PostPassStarted {
        run_id: Uuid,
        path: String,
        macro_name: String,
    },
    /// The master-file post-pass was skipped.
    PostPassSkipped { run_id: Uuid, reason: PostPassSkip },
    /// The run ended (completed or cancelled).
    RunFinished { run_id: Uuid, summary: BatchSummary },
}

impl RefreshEvent {
    /// Returns the namespaced event type for the envelope (e.g., `"file.started"`).
    pub fn event_type(&self) -> &'static str {
        match self {
            RefreshEvent::RunStarted { .. } => "run.started",
            RefreshEvent::FileStarted { .. } => "file.started",
            RefreshEvent::FileFinished { .. } => "file.finished",
            RefreshEvent::Waiting { .. } => "run.waiting",
            RefreshEvent::PostPassStarted { .. } => "post_pass.started",
            RefreshEvent::PostPassSkipped { .. } => "post_pass.skipped",
            RefreshEvent::RunFinished { .. } => "run.finished",
        }
    }

    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            RefreshEvent::RunStarted { run_id, .. }
            | RefreshEvent::FileStarted { run_id, .. }
            | RefreshEvent::FileFinished { run_id, .. }
            | RefreshEvent::Waiting { run_id, .. }
            | RefreshEvent::PostPassStarted { run_id, .. }
            | RefreshEvent::PostPassSkipped { run_id, .. }
            | RefreshEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for refresh events.
///
/// Slow receivers that fall behind receive a `Lagged` error and miss events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently without subscribers.
    pub fn emit(&self, event: RefreshEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::trace!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(RefreshEvent::RunStarted {
            run_id: Uuid::nil(),
            file_count: 3,
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "run.started");
        assert!(matches!(
            envelope.payload,
            RefreshEvent::RunStarted { file_count: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(RefreshEvent::Waiting {
            run_id: Uuid::nil(),
            kind: WaitKind::Settle,
            seconds: 30,
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.payload, e2.payload);
        assert_eq!(e1.event_type, "run.waiting");
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(4);
        bus.emit(RefreshEvent::RunStarted {
            run_id: Uuid::nil(),
            file_count: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_refresh_event_json() {
        let event = RefreshEvent::Waiting {
            run_id: Uuid::nil(),
            kind: WaitKind::InterFile,
            seconds: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "waiting");
        assert_eq!(json["kind"], "inter_file");
        assert_eq!(json["seconds"], 5);
    }

    #[test]
    fn test_run_id_accessor() {
        let id = Uuid::now_v7();
        let event = RefreshEvent::PostPassSkipped {
            run_id: id,
            reason: PostPassSkip::NoMasterConfigured,
        };
        assert_eq!(event.run_id(), id);
        assert_eq!(event.event_type(), "post_pass.skipped");
    }
}
