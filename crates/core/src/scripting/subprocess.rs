//! Subprocess management for one script run.
//!
//! [`run_script`] spawns the interpreter in its own process group, drains
//! stdout and stderr concurrently into capped capture buffers (streaming
//! chunks to a callback as they arrive), and enforces the wall-clock
//! deadline: SIGTERM to the whole group, a short grace period, then
//! SIGKILL. Reader failures are logged and never abort the run.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::executor::{ChunkSink, RunError, RunOutcome, RunSpec, StreamKind};

/// Marker appended to a capture buffer when the cap was hit.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Read buffer size for the stream drain loops.
const CHUNK_SIZE: usize = 8 * 1024;

/// How long a SIGTERM'd process group gets before SIGKILL.
const KILL_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Spawn and supervise one script run.
///
/// `on_chunk` is called from the reader tasks with each captured chunk;
/// chunks beyond the capture cap are still streamed, only the stored
/// buffer is truncated.
pub async fn run_script(spec: RunSpec, on_chunk: ChunkSink) -> Result<RunOutcome, RunError> {
    let mut cmd = Command::new(&spec.program);
    cmd.arg(&spec.script_file)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Backstop: if this task is dropped mid-run the child dies too.
        .kill_on_drop(true);

    for (key, value) in &spec.env_overlay {
        cmd.env(key, value);
    }

    // Own process group so the deadline can signal the whole tree, not
    // just the immediate interpreter.
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(RunError::Spawn)?;
    let pid = child.id();

    let stdout_task = spawn_reader(
        child.stdout.take(),
        StreamKind::Stdout,
        spec.output_cap,
        on_chunk.clone(),
    );
    let stderr_task = spawn_reader(
        child.stderr.take(),
        StreamKind::Stderr,
        spec.output_cap,
        on_chunk,
    );

    let deadline = tokio::time::sleep(spec.timeout);
    tokio::pin!(deadline);

    let (status, timed_out) = tokio::select! {
        status = child.wait() => (status.map_err(RunError::Wait)?, false),
        _ = &mut deadline => {
            terminate_group(pid, false);
            let status = match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(status) => status.map_err(RunError::Wait)?,
                Err(_) => {
                    terminate_group(pid, true);
                    child.wait().await.map_err(RunError::Wait)?
                }
            };
            (status, true)
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;

    // Readers finish on EOF once the child (and its pipes) are gone.
    let (stdout, stdout_truncated) = stdout_task.await.unwrap_or_default();
    let (stderr, stderr_truncated) = stderr_task.await.unwrap_or_default();

    Ok(RunOutcome {
        exit_code: status.code(),
        timed_out,
        stdout,
        stdout_truncated,
        stderr,
        stderr_truncated,
        duration_ms,
    })
}

/// Drain one child stream to completion.
///
/// Returns the captured text (with [`TRUNCATION_MARKER`] appended when
/// the cap was hit) and whether truncation occurred.
fn spawn_reader<R>(
    handle: Option<R>,
    kind: StreamKind,
    cap: usize,
    on_chunk: ChunkSink,
) -> tokio::task::JoinHandle<(String, bool)>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = String::new();
        let mut truncated = false;

        let Some(mut reader) = handle else {
            return (captured, truncated);
        };

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();

                    if captured.len() < cap {
                        let room = cap - captured.len();
                        if chunk.len() <= room {
                            captured.push_str(&chunk);
                        } else {
                            let mut cut = room;
                            while cut > 0 && !chunk.is_char_boundary(cut) {
                                cut -= 1;
                            }
                            captured.push_str(&chunk[..cut]);
                            truncated = true;
                        }
                    } else {
                        truncated = true;
                    }

                    on_chunk(kind, chunk);
                }
                Err(e) => {
                    tracing::warn!(stream = kind.as_str(), error = %e, "output reader failed");
                    truncated = true;
                    break;
                }
            }
        }

        if truncated {
            captured.push_str(TRUNCATION_MARKER);
        }
        (captured, truncated)
    })
}

/// Signal the child's process group: SIGTERM first, SIGKILL when forced.
#[cfg(unix)]
fn terminate_group(pid: Option<u32>, force: bool) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        tracing::warn!(pid, signal = %signal, error = %e, "failed to signal process group");
    }
}

#[cfg(not(unix))]
fn terminate_group(_pid: Option<u32>, _force: bool) {
    // Non-Unix platforms rely on kill_on_drop for cleanup.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn sink() -> (ChunkSink, Arc<Mutex<Vec<(StreamKind, String)>>>) {
        let chunks: Arc<Mutex<Vec<(StreamKind, String)>>> = Arc::default();
        let captured = Arc::clone(&chunks);
        let sink: ChunkSink = Arc::new(move |kind, text| {
            captured.lock().unwrap().push((kind, text));
        });
        (sink, chunks)
    }

    fn shell_spec(script: &str, timeout: Duration) -> RunSpec {
        RunSpec {
            program: PathBuf::from("/bin/sh"),
            script_file: PathBuf::from(script),
            working_dir: std::env::temp_dir(),
            env_overlay: vec![],
            timeout,
            output_cap: 64 * 1024,
        }
    }

    /// Write a throwaway shell script and return its path.
    fn write_script(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tempo-subprocess-test-{name}-{}", std::process::id()));
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let script = write_script("echo", "echo hello\n");
        let (sink, chunks) = sink();

        let outcome = run_script(shell_spec(script.to_str().unwrap(), Duration::from_secs(10)), sink)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.stderr, "");
        assert!(!outcome.stdout_truncated);

        let chunks = chunks.lock().unwrap();
        assert!(chunks
            .iter()
            .any(|(k, t)| *k == StreamKind::Stdout && t.contains("hello")));
    }

    #[tokio::test]
    async fn captures_stderr_and_nonzero_exit() {
        let script = write_script("fail", "echo oops >&2\nexit 3\n");
        let (sink, _) = sink();

        let outcome = run_script(shell_spec(script.to_str().unwrap(), Duration::from_secs(10)), sink)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stderr, "oops\n");
    }

    #[tokio::test]
    async fn environment_overlay_is_applied() {
        let script = write_script("env", "printf '%s' \"$TEMPO_TEST_VAR\"\n");
        let (sink, _) = sink();
        let mut spec = shell_spec(script.to_str().unwrap(), Duration::from_secs(10));
        spec.env_overlay = vec![("TEMPO_TEST_VAR".into(), "overlaid".into())];

        let outcome = run_script(spec, sink).await.unwrap();
        assert_eq!(outcome.stdout, "overlaid");
    }

    #[tokio::test]
    async fn deadline_terminates_the_run() {
        let script = write_script("sleep", "sleep 30\n");
        let (sink, _) = sink();

        let started = Instant::now();
        let outcome = run_script(
            shell_spec(script.to_str().unwrap(), Duration::from_millis(300)),
            sink,
        )
        .await
        .unwrap();

        assert!(outcome.timed_out);
        // The group got SIGTERM; sh dies promptly, well inside the grace.
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(outcome.duration_ms >= 300);
    }

    #[tokio::test]
    async fn output_beyond_cap_is_truncated_and_marked() {
        // 64 KiB of 'a' against a 1 KiB cap.
        let script = write_script(
            "big",
            "i=0\nwhile [ $i -lt 1024 ]; do printf 'aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa'; i=$((i+1)); done\n",
        );
        let (sink, _) = sink();
        let mut spec = shell_spec(script.to_str().unwrap(), Duration::from_secs(30));
        spec.output_cap = 1024;

        let outcome = run_script(spec, sink).await.unwrap();

        assert!(outcome.stdout_truncated);
        assert!(outcome.stdout.ends_with(TRUNCATION_MARKER));
        assert_eq!(outcome.stdout.len(), 1024 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let spec = RunSpec {
            program: PathBuf::from("/nonexistent/interpreter"),
            script_file: PathBuf::from("x.py"),
            working_dir: std::env::temp_dir(),
            env_overlay: vec![],
            timeout: Duration::from_secs(1),
            output_cap: 1024,
        };
        let (sink, _) = sink();

        let err = run_script(spec, sink).await.unwrap_err();
        assert!(matches!(err, RunError::Spawn(_)));
    }
}
