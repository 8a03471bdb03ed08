//! Per-run lifecycle: prepare → spawn → capture → reap → persist.
//!
//! [`execute_request`] drives one [`RunRequest`] to a terminal
//! [`ExecutionRecord`](tempo_db::models::execution::ExecutionRecord).
//! It never returns an error for a run-level failure: every terminal
//! outcome (environment failure, spawn failure, non-zero exit, timeout)
//! is captured on the record, and lifecycle events stream through the
//! bus along the way.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tempo_core::scripting::environment::EnvironmentManager;
use tempo_core::scripting::executor::{ChunkSink, RunSpec, StreamKind};
use tempo_core::scripting::status::{STATUS_FAILED, STATUS_SUCCESS, STATUS_TIMEOUT};
use tempo_core::scripting::subprocess;
use tempo_core::types::DbId;
use tempo_db::models::execution::FinalizeExecution;
use tempo_db::models::script::Script;
use tempo_db::models::setting::KEY_DEFAULT_SCRIPT_TIMEOUT;
use tempo_db::repositories::{ExecutionRepo, ScriptRepo, SettingsRepo};
use tempo_db::{retry, DbPool};
use tempo_events::delivery::email::should_notify;
use tempo_events::{EmailDelivery, EventBus, EventKind, RunEvent};

use crate::config::AppConfig;
use crate::engine::queue::RunRequest;

/// Everything a worker needs to execute runs.
#[derive(Clone)]
pub struct RunContext {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub bus: Arc<EventBus>,
    /// `None` when SMTP is not configured.
    pub mailer: Option<Arc<EmailDelivery>>,
}

/// Execute one run request end to end.
///
/// Returns the execution record id when a record was created, or `None`
/// when the request was dropped (script gone/disabled, or another run
/// already active).
pub async fn execute_request(ctx: &RunContext, request: RunRequest) -> Option<DbId> {
    let script = match ScriptRepo::find_by_id(&ctx.pool, request.script_id).await {
        Ok(Some(script)) => script,
        Ok(None) => {
            tracing::warn!(
                script_id = request.script_id,
                request_id = %request.request_id,
                "run request for missing script dropped"
            );
            return None;
        }
        Err(e) => {
            tracing::error!(script_id = request.script_id, error = %e, "failed to load script");
            return None;
        }
    };

    if !script.enabled {
        tracing::warn!(script_id = script.id, "run request for disabled script dropped");
        return None;
    }

    // Claim the script's run slot. A concurrent run means this request
    // is rejected outright: scheduled fires are skipped (the scheduler
    // already advanced last_fired_at), never queued or coalesced.
    let started_at = Utc::now();
    let execution_id = match ExecutionRepo::try_start(
        &ctx.pool,
        script.id,
        request.trigger_id,
        request.triggered_by.as_str(),
        started_at,
    )
    .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::warn!(
                script_id = script.id,
                script_name = %script.name,
                request_id = %request.request_id,
                "skipped fire: a run is already active"
            );
            return None;
        }
        Err(e) => {
            tracing::error!(script_id = script.id, error = %e, "failed to create execution record");
            return None;
        }
    };

    ctx.bus.publish(
        RunEvent::new(EventKind::RunStarted, script.id)
            .with_execution(execution_id)
            .with_payload(serde_json::json!({
                "script_name": script.name,
                "triggered_by": request.triggered_by.as_str(),
            })),
    );

    let outcome = run_prepared(ctx, &script, execution_id).await;
    finalize(ctx, &script, execution_id, outcome).await;
    Some(execution_id)
}

/// Terminal result of the prepare + spawn + capture phases.
struct RunResult {
    status: &'static str,
    exit_code: Option<i64>,
    stdout: String,
    stderr: String,
    stdout_truncated: bool,
    stderr_truncated: bool,
}

/// Prepare the environment and run the interpreter.
async fn run_prepared(ctx: &RunContext, script: &Script, execution_id: DbId) -> RunResult {
    let manager = EnvironmentManager::new(
        &ctx.config.data_path,
        script.folder_name.as_deref(),
        &script.slug,
    );

    // Materialize source fresh and synchronize the venv. Any failure is
    // a terminal `failed` with the provisioning error as stderr; no
    // child was spawned.
    let provisioned = match manager.write_source(&script.content).await {
        Ok(()) => manager.provision(&script.python_version, &script.requirements).await,
        Err(e) => Err(e),
    };

    let report = match provisioned {
        Ok(report) => report,
        Err(e) => {
            ctx.bus.publish(
                RunEvent::new(EventKind::EnvFailed, script.id)
                    .with_execution(execution_id)
                    .with_payload(serde_json::json!({
                        "phase": e.phase.as_str(),
                        "error": e.detail,
                    })),
            );
            return RunResult {
                status: STATUS_FAILED,
                exit_code: None,
                stdout: String::new(),
                stderr: e.to_string(),
                stdout_truncated: false,
                stderr_truncated: false,
            };
        }
    };

    ctx.bus.publish(
        RunEvent::new(EventKind::EnvReady, script.id)
            .with_execution(execution_id)
            .with_payload(serde_json::json!({
                "created": report.created,
                "installed": report.installed,
            })),
    );

    let timeout_secs = effective_timeout_secs(ctx, script).await;
    let spec = RunSpec {
        program: manager.python_binary(),
        script_file: manager.script_file().to_path_buf(),
        working_dir: manager.script_dir().to_path_buf(),
        env_overlay: script.environment().into_iter().collect(),
        timeout: Duration::from_secs(timeout_secs),
        output_cap: ctx.config.output_cap_bytes,
    };

    let sink = chunk_sink(ctx.bus.clone(), script.id, execution_id);
    match subprocess::run_script(spec, sink).await {
        Ok(outcome) => {
            let status = if outcome.timed_out {
                STATUS_TIMEOUT
            } else if outcome.exit_code == Some(0) {
                STATUS_SUCCESS
            } else {
                STATUS_FAILED
            };
            RunResult {
                status,
                exit_code: outcome.exit_code.map(i64::from),
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                stdout_truncated: outcome.stdout_truncated,
                stderr_truncated: outcome.stderr_truncated,
            }
        }
        Err(e) => RunResult {
            status: STATUS_FAILED,
            exit_code: None,
            stdout: String::new(),
            stderr: e.to_string(),
            stdout_truncated: false,
            stderr_truncated: false,
        },
    }
}

/// Per-script timeout override, else the settings-table default, else
/// the configured fallback.
async fn effective_timeout_secs(ctx: &RunContext, script: &Script) -> u64 {
    if let Some(secs) = script.timeout_secs {
        if secs > 0 {
            return secs as u64;
        }
    }
    SettingsRepo::get_i64_or(
        &ctx.pool,
        KEY_DEFAULT_SCRIPT_TIMEOUT,
        ctx.config.default_timeout_secs,
    )
    .await
    .unwrap_or(ctx.config.default_timeout_secs)
    .max(1) as u64
}

/// Build the live-output callback that publishes chunk events.
fn chunk_sink(bus: Arc<EventBus>, script_id: DbId, execution_id: DbId) -> ChunkSink {
    Arc::new(move |kind, chunk: String| {
        let event_kind = match kind {
            StreamKind::Stdout => EventKind::RunStdout,
            StreamKind::Stderr => EventKind::RunStderr,
        };
        bus.publish(
            RunEvent::new(event_kind, script_id)
                .with_execution(execution_id)
                .with_payload(serde_json::json!({ "chunk": chunk })),
        );
    })
}

/// Persist the terminal record, bump counters, emit `run.finished`, and
/// kick off the completion email when configured.
async fn finalize(ctx: &RunContext, script: &Script, execution_id: DbId, result: RunResult) {
    let finished_at = Utc::now();
    let started_at = match ExecutionRepo::find_by_id(&ctx.pool, execution_id).await {
        Ok(Some(record)) => record.started_at,
        _ => finished_at,
    };
    let duration_ms = (finished_at - started_at).num_milliseconds().max(0);

    let outcome = FinalizeExecution {
        status: result.status,
        exit_code: result.exit_code,
        stdout: result.stdout,
        stderr: result.stderr,
        stdout_truncated: result.stdout_truncated,
        stderr_truncated: result.stderr_truncated,
        finished_at,
        duration_ms,
    };

    // The finalize and counter writes are the engine's last obligations;
    // retry through transient store contention.
    let finalized = retry::with_backoff("finalize execution", || {
        ExecutionRepo::finalize(&ctx.pool, execution_id, &outcome)
    })
    .await;

    match finalized {
        Ok(true) => {}
        Ok(false) => {
            tracing::error!(execution_id, "execution record was not running at finalize");
        }
        Err(e) => {
            tracing::error!(execution_id, error = %e, "failed to finalize execution record");
        }
    }

    let success = result.status == STATUS_SUCCESS;
    if let Err(e) = retry::with_backoff("bump run counters", || {
        ScriptRepo::record_run_result(&ctx.pool, script.id, success, finished_at)
    })
    .await
    {
        tracing::error!(script_id = script.id, error = %e, "failed to update run counters");
    }

    ctx.bus.publish(
        RunEvent::new(EventKind::RunFinished, script.id)
            .with_execution(execution_id)
            .with_payload(serde_json::json!({
                "script_name": script.name,
                "status": result.status,
                "exit_code": outcome.exit_code,
                "duration_ms": duration_ms,
            })),
    );

    send_completion_email(ctx, script, &outcome);
}

/// Fire-and-forget completion notification.
fn send_completion_email(ctx: &RunContext, script: &Script, outcome: &FinalizeExecution) {
    let Some(mailer) = ctx.mailer.clone() else {
        return;
    };
    if !script.email_on_completion || !should_notify(&script.email_trigger, outcome.status) {
        return;
    }
    let recipients = script.recipients();
    if recipients.is_empty() {
        return;
    }

    let script_name = script.name.clone();
    let status = outcome.status.to_string();
    let output = format!("{}\n{}", outcome.stdout, outcome.stderr);

    tokio::spawn(async move {
        for recipient in recipients {
            if let Err(e) = mailer
                .deliver_run_notification(&recipient, &script_name, &status, &output)
                .await
            {
                tracing::warn!(to = %recipient, error = %e, "completion email failed");
            }
        }
    });
}
