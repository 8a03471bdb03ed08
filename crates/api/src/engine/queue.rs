//! The bounded run queue feeding the worker pool.
//!
//! Enqueue is non-blocking: a full queue rejects immediately with
//! [`EnqueueError::QueueFull`]. Manual and URL callers surface that as
//! HTTP 503; scheduled fires degrade to a `trigger.overrun` event.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use tempo_core::scripting::status::{
    TRIGGERED_BY_MANUAL, TRIGGERED_BY_SCHEDULE, TRIGGERED_BY_STARTUP, TRIGGERED_BY_URL,
};
use tempo_core::types::DbId;

/// Origin of a run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggeredBy {
    Schedule,
    Manual,
    Url,
    Startup,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => TRIGGERED_BY_SCHEDULE,
            Self::Manual => TRIGGERED_BY_MANUAL,
            Self::Url => TRIGGERED_BY_URL,
            Self::Startup => TRIGGERED_BY_STARTUP,
        }
    }
}

/// An in-memory intent to execute a script.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Client-visible id for tracking the request through logs.
    pub request_id: Uuid,
    pub script_id: DbId,
    pub trigger_id: Option<DbId>,
    pub triggered_by: TriggeredBy,
}

impl RunRequest {
    pub fn new(script_id: DbId, trigger_id: Option<DbId>, triggered_by: TriggeredBy) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            script_id,
            trigger_id,
            triggered_by,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("run queue is full")]
    QueueFull,

    #[error("run queue is shut down")]
    ShuttingDown,
}

/// Sender half of the bounded run queue. Cheap to clone; lives in
/// [`AppState`](crate::state::AppState).
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<RunRequest>,
}

/// Receiver half, shared by the worker pool. The mutex hands one
/// request to one worker at a time.
pub type SharedQueueReceiver = Arc<Mutex<mpsc::Receiver<RunRequest>>>;

impl RunQueue {
    /// Create a queue bounded at `capacity` requests.
    pub fn new(capacity: usize) -> (Self, SharedQueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, Arc::new(Mutex::new(rx)))
    }

    /// Non-blocking enqueue.
    pub fn try_enqueue(&self, request: RunRequest) -> Result<(), EnqueueError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::ShuttingDown,
        })
    }

    /// Is the worker pool still holding its receiver? Used by the
    /// health endpoint.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_and_receive_fifo() {
        let (queue, rx) = RunQueue::new(4);

        queue
            .try_enqueue(RunRequest::new(1, None, TriggeredBy::Manual))
            .unwrap();
        queue
            .try_enqueue(RunRequest::new(2, Some(9), TriggeredBy::Schedule))
            .unwrap();

        let mut rx = rx.lock().await;
        assert_eq!(rx.recv().await.unwrap().script_id, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.script_id, 2);
        assert_eq!(second.trigger_id, Some(9));
        assert_eq!(second.triggered_by, TriggeredBy::Schedule);
    }

    #[tokio::test]
    async fn overflow_rejects_without_blocking() {
        let (queue, _rx) = RunQueue::new(2);

        queue
            .try_enqueue(RunRequest::new(1, None, TriggeredBy::Manual))
            .unwrap();
        queue
            .try_enqueue(RunRequest::new(2, None, TriggeredBy::Manual))
            .unwrap();

        let err = queue
            .try_enqueue(RunRequest::new(3, None, TriggeredBy::Manual))
            .unwrap_err();
        assert_eq!(err, EnqueueError::QueueFull);
    }

    #[tokio::test]
    async fn closed_queue_reports_shutdown() {
        let (queue, rx) = RunQueue::new(1);
        drop(rx);

        let err = queue
            .try_enqueue(RunRequest::new(1, None, TriggeredBy::Manual))
            .unwrap_err();
        assert_eq!(err, EnqueueError::ShuttingDown);
    }

    #[test]
    fn triggered_by_strings() {
        assert_eq!(TriggeredBy::Schedule.as_str(), "schedule");
        assert_eq!(TriggeredBy::Manual.as_str(), "manual");
        assert_eq!(TriggeredBy::Url.as_str(), "url");
        assert_eq!(TriggeredBy::Startup.as_str(), "startup");
    }
}
