//! Run specification and outcome types shared between the subprocess
//! layer and the execution engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which child stream a captured chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Callback invoked for every captured output chunk, used to stream
/// live output while the run is in flight.
pub type ChunkSink = Arc<dyn Fn(StreamKind, String) + Send + Sync>;

/// Everything needed to launch one script run.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// The isolated interpreter binary (`.venv/bin/python`).
    pub program: PathBuf,
    /// The materialized script source file.
    pub script_file: PathBuf,
    /// Working directory for the child (the script's directory).
    pub working_dir: PathBuf,
    /// Variables overlaid on the inherited process environment.
    pub env_overlay: Vec<(String, String)>,
    /// Wall-clock deadline for the RUNNING state.
    pub timeout: Duration,
    /// Capture cap per stream, in bytes. Output beyond this is dropped
    /// and the stream is marked truncated.
    pub output_cap: usize,
}

/// Captured result of a finished (or killed) run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Exit code, or `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    /// True when the deadline expired and the process group was
    /// terminated; the terminal status is `timeout` regardless of how
    /// the child died.
    pub timed_out: bool,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub duration_ms: u64,
}

/// Errors that prevent a run from producing a [`RunOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The interpreter process could not be spawned at all.
    #[error("failed to spawn interpreter: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting on the child failed after a successful spawn.
    #[error("failed to reap child process: {0}")]
    Wait(#[source] std::io::Error),
}
