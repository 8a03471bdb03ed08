//! Execution status and trigger-origin constants.
//!
//! Stored as TEXT in the `execution_logs` table; kept as constants so the
//! engine, repositories, and API all agree on the exact spelling.

/// The run has a live worker attached; `finished_at` is NULL.
pub const STATUS_RUNNING: &str = "running";

/// Terminal: the child exited with code 0.
pub const STATUS_SUCCESS: &str = "success";

/// Terminal: the child exited non-zero, failed to spawn, or the
/// environment could not be prepared.
pub const STATUS_FAILED: &str = "failed";

/// Terminal: the wall-clock deadline expired and the process group was
/// terminated.
pub const STATUS_TIMEOUT: &str = "timeout";

/// Origin of a run: a cron or interval trigger fired.
pub const TRIGGERED_BY_SCHEDULE: &str = "schedule";

/// Origin of a run: the authenticated execute endpoint.
pub const TRIGGERED_BY_MANUAL: &str = "manual";

/// Origin of a run: the API-key URL trigger endpoint.
pub const TRIGGERED_BY_URL: &str = "url";

/// Origin of a run: a startup trigger fired at boot.
pub const TRIGGERED_BY_STARTUP: &str = "startup";

/// Stderr marker written when a `running` record is reconciled after an
/// unclean shutdown.
pub const ABANDONED_MARKER: &str = "abandoned on restart";
