//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the fan-out hub for run lifecycle and output events.
//! It is shared as `Arc<EventBus>` across the engine, scheduler, and
//! WebSocket layer. Each subscriber owns an independent bounded mailbox
//! (the broadcast ring): a subscriber that falls behind loses its oldest
//! undelivered events and observes `RecvError::Lagged`, but the
//! subscription itself survives and later events arrive in emission
//! order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tempo_core::types::DbId;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// The closed set of event types the platform emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A worker claimed a run and wrote the `running` record.
    #[serde(rename = "run.started")]
    RunStarted,
    /// A chunk of child stdout arrived.
    #[serde(rename = "run.stdout")]
    RunStdout,
    /// A chunk of child stderr arrived.
    #[serde(rename = "run.stderr")]
    RunStderr,
    /// The run reached a terminal status.
    #[serde(rename = "run.finished")]
    RunFinished,
    /// A scheduled fire was dropped because the run queue was full.
    #[serde(rename = "trigger.overrun")]
    TriggerOverrun,
    /// Environment provisioning completed.
    #[serde(rename = "env.ready")]
    EnvReady,
    /// Environment provisioning failed.
    #[serde(rename = "env.failed")]
    EnvFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run.started",
            Self::RunStdout => "run.stdout",
            Self::RunStderr => "run.stderr",
            Self::RunFinished => "run.finished",
            Self::TriggerOverrun => "trigger.overrun",
            Self::EnvReady => "env.ready",
            Self::EnvFailed => "env.failed",
        }
    }
}

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// A lifecycle or output event for one script.
///
/// Constructed via [`RunEvent::new`] and enriched with
/// [`with_execution`](RunEvent::with_execution) and
/// [`with_payload`](RunEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub kind: EventKind,

    /// The script this event concerns.
    pub script_id: DbId,

    /// The execution record, when one exists yet.
    pub execution_id: Option<DbId>,

    /// Type-specific JSON payload.
    pub payload: serde_json::Value,

    /// When the event was emitted (UTC).
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(kind: EventKind, script_id: DbId) -> Self {
        Self {
            kind,
            script_id,
            execution_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_execution(mut self, execution_id: DbId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventFilter
// ---------------------------------------------------------------------------

/// Optional per-subscriber filter: restrict by script and/or event kind.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub script_id: Option<DbId>,
    pub kinds: Option<HashSet<EventKind>>,
}

impl EventFilter {
    pub fn matches(&self, event: &RunEvent) -> bool {
        if let Some(script_id) = self.script_id {
            if event.script_id != script_id {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default per-subscriber mailbox capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `capacity`
    /// undelivered events. When a mailbox fills, the oldest events are
    /// dropped for that subscriber only.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With zero subscribers the event is silently dropped; lifecycle
    /// state lives in the store, not on the bus.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
