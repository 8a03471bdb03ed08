//! The trigger scheduler: one task owning every armed timer.
//!
//! On boot the scheduler fires startup triggers, computes `next_fire_at`
//! for enabled cron/interval triggers, and then sleeps until the
//! earliest due instant. Mutation hooks (trigger CRUD, script
//! enable/disable) arrive over a command channel and re-arm the
//! affected timers. Missed fires coalesce: a burst of delayed due times
//! produces one fire and a fresh future arming, never a replay.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tempo_core::cron::{parse_timezone, CronExpression, PREVIEW_COUNT};
use tempo_core::types::{DbId, Timestamp};
use tempo_db::models::trigger::{Trigger, TriggerConfig};
use tempo_db::repositories::{ScriptRepo, TriggerRepo};
use tempo_db::{retry, DbPool};
use tempo_events::{EventBus, EventKind, RunEvent};

use crate::engine::queue::{EnqueueError, RunQueue, RunRequest, TriggeredBy};

/// Mutation hooks delivered to the scheduler task.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// A trigger was created, updated, deleted, or toggled.
    TriggerChanged(DbId),
    /// A script's enabled flag flipped; pause/resume all its triggers.
    ScriptChanged(DbId),
}

/// Command channel into the scheduler; lives in
/// [`AppState`](crate::state::AppState).
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn notify_trigger_changed(&self, trigger_id: DbId) {
        let _ = self.tx.send(SchedulerCommand::TriggerChanged(trigger_id));
    }

    pub fn notify_script_changed(&self, script_id: DbId) {
        let _ = self.tx.send(SchedulerCommand::ScriptChanged(script_id));
    }
}

/// The scheduler task state.
pub struct TriggerScheduler {
    pool: DbPool,
    queue: RunQueue,
    bus: std::sync::Arc<EventBus>,
    rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    /// Armed timers: trigger id → next due instant (UTC).
    armed: HashMap<DbId, Timestamp>,
}

impl TriggerScheduler {
    pub fn new(
        pool: DbPool,
        queue: RunQueue,
        bus: std::sync::Arc<EventBus>,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                pool,
                queue,
                bus,
                rx,
                armed: HashMap::new(),
            },
            SchedulerHandle { tx },
        )
    }

    /// Run until cancelled: startup fan-out, boot arming, then the
    /// timer loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.fire_startup_triggers().await;
        self.arm_all().await;
        tracing::info!(armed = self.armed.len(), "Trigger scheduler started");

        loop {
            let sleep = match self.armed.values().min() {
                Some(due) => {
                    let delay = (*due - Utc::now()).to_std().unwrap_or_default();
                    tokio::time::sleep(delay)
                }
                // Nothing armed: park until a command arrives.
                None => tokio::time::sleep(std::time::Duration::from_secs(3600)),
            };
            tokio::pin!(sleep);

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Trigger scheduler shutting down");
                    break;
                }
                command = self.rx.recv() => match command {
                    Some(SchedulerCommand::TriggerChanged(id)) => self.rearm_trigger(id).await,
                    Some(SchedulerCommand::ScriptChanged(id)) => self.rearm_script(id).await,
                    None => break,
                },
                _ = &mut sleep => self.fire_due().await,
            }
        }
    }

    /// Enqueue every enabled startup trigger once, at boot.
    async fn fire_startup_triggers(&self) {
        let triggers = match TriggerRepo::list_armable(&self.pool).await {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!(error = %e, "failed to load startup triggers");
                return;
            }
        };

        for trigger in triggers.iter().filter(|t| t.kind == "startup") {
            let request =
                RunRequest::new(trigger.script_id, Some(trigger.id), TriggeredBy::Startup);
            match self.queue.try_enqueue(request) {
                Ok(()) => {
                    let _ = TriggerRepo::record_fire(&self.pool, trigger.id, Utc::now(), None).await;
                    tracing::info!(trigger_id = trigger.id, script_id = trigger.script_id, "startup trigger fired");
                }
                Err(e) => self.report_overrun(trigger, &e).await,
            }
        }
    }

    /// Compute and persist `next_fire_at` for every armable
    /// cron/interval trigger.
    async fn arm_all(&mut self) {
        let triggers = match TriggerRepo::list_armable(&self.pool).await {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!(error = %e, "failed to load triggers for arming");
                return;
            }
        };

        for trigger in triggers {
            self.arm(&trigger).await;
        }
    }

    /// Arm one trigger (cron/interval only), persisting the computed
    /// time. An unparseable cron expression disables the trigger so one
    /// bad row can never wedge the scheduler.
    async fn arm(&mut self, trigger: &Trigger) {
        let next = match compute_next_fire(trigger, Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(
                    trigger_id = trigger.id,
                    script_id = trigger.script_id,
                    error = %e,
                    "disabling trigger with invalid configuration"
                );
                let _ = TriggerRepo::disable(&self.pool, trigger.id).await;
                self.armed.remove(&trigger.id);
                return;
            }
        };

        match next {
            Some(next) => {
                if let Err(e) = TriggerRepo::set_next_fire(&self.pool, trigger.id, Some(next)).await
                {
                    tracing::error!(trigger_id = trigger.id, error = %e, "failed to persist next fire time");
                }
                self.armed.insert(trigger.id, next);
            }
            None => {
                let _ = TriggerRepo::set_next_fire(&self.pool, trigger.id, None).await;
                self.armed.remove(&trigger.id);
            }
        }
    }

    /// Re-read one trigger from the store and re-arm (or disarm) it.
    async fn rearm_trigger(&mut self, trigger_id: DbId) {
        self.armed.remove(&trigger_id);

        let trigger = match TriggerRepo::find_by_id(&self.pool, trigger_id).await {
            Ok(Some(trigger)) => trigger,
            Ok(None) => return, // deleted
            Err(e) => {
                tracing::error!(trigger_id, error = %e, "failed to reload trigger");
                return;
            }
        };

        if !trigger.enabled {
            let _ = TriggerRepo::set_next_fire(&self.pool, trigger_id, None).await;
            return;
        }

        let script_enabled = matches!(
            ScriptRepo::find_by_id(&self.pool, trigger.script_id).await,
            Ok(Some(script)) if script.enabled
        );
        if !script_enabled {
            return;
        }

        self.arm(&trigger).await;
    }

    /// Pause or resume every trigger owned by one script.
    async fn rearm_script(&mut self, script_id: DbId) {
        let triggers = match TriggerRepo::list_for_script(&self.pool, script_id).await {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!(script_id, error = %e, "failed to reload script triggers");
                return;
            }
        };

        for trigger in triggers {
            self.rearm_trigger(trigger.id).await;
        }
    }

    /// Fire every armed trigger whose due time has passed.
    async fn fire_due(&mut self) {
        let now = Utc::now();
        let due: Vec<DbId> = self
            .armed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| *id)
            .collect();

        for trigger_id in due {
            self.fire_one(trigger_id, now).await;
        }
    }

    /// Fire a single due trigger: reread enabled state, enqueue, advance
    /// the fire history, and re-arm — all from current wall-clock, so a
    /// burst of missed due times coalesces to one fire.
    async fn fire_one(&mut self, trigger_id: DbId, now: Timestamp) {
        self.armed.remove(&trigger_id);

        let trigger = match TriggerRepo::find_by_id(&self.pool, trigger_id).await {
            Ok(Some(trigger)) => trigger,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(trigger_id, error = %e, "failed to reload due trigger");
                // Keep the timer armed one interval out so a transient
                // read failure cannot silently kill the schedule.
                self.armed.insert(trigger_id, now + ChronoDuration::seconds(60));
                return;
            }
        };

        if !trigger.enabled {
            return;
        }
        let script_enabled = matches!(
            ScriptRepo::find_by_id(&self.pool, trigger.script_id).await,
            Ok(Some(script)) if script.enabled
        );
        if !script_enabled {
            return;
        }

        let next = match compute_next_fire(&trigger, now) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(trigger_id, error = %e, "disabling trigger with invalid configuration");
                let _ = TriggerRepo::disable(&self.pool, trigger_id).await;
                return;
            }
        };

        let request = RunRequest::new(trigger.script_id, Some(trigger.id), TriggeredBy::Schedule);
        match self.queue.try_enqueue(request) {
            Ok(()) => {
                tracing::debug!(trigger_id, script_id = trigger.script_id, "trigger fired");
            }
            Err(e) => self.report_overrun(&trigger, &e).await,
        }

        // The fire is recorded either way; overruns drop the request,
        // not the tick.
        let persisted = retry::with_backoff("record trigger fire", || {
            TriggerRepo::record_fire(&self.pool, trigger.id, now, next)
        })
        .await;
        if let Err(e) = persisted {
            tracing::error!(trigger_id, error = %e, "failed to record trigger fire");
        }

        if let Some(next) = next {
            self.armed.insert(trigger.id, next);
        }
    }

    /// A fire could not be enqueued: emit `trigger.overrun` and move on.
    async fn report_overrun(&self, trigger: &Trigger, error: &EnqueueError) {
        tracing::warn!(
            trigger_id = trigger.id,
            script_id = trigger.script_id,
            error = %error,
            "scheduled fire dropped"
        );
        self.bus.publish(
            RunEvent::new(EventKind::TriggerOverrun, trigger.script_id).with_payload(
                serde_json::json!({
                    "trigger_id": trigger.id,
                    "reason": error.to_string(),
                }),
            ),
        );
    }
}

/// Compute a trigger's next fire instant strictly after
/// `max(now, last_fired_at)`.
///
/// - Interval: `max(now, last_fired_at) + seconds`; first arming after
///   create is `now + seconds`.
/// - Cron: the smallest satisfying instant in the configured timezone.
/// - Manual/startup: never armed (`None`).
pub fn compute_next_fire(
    trigger: &Trigger,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, tempo_core::error::CoreError> {
    let base = match trigger.last_fired_at {
        Some(last) if last > now => last,
        _ => now,
    };

    match trigger.config()? {
        TriggerConfig::Interval { seconds } => Ok(Some(base + ChronoDuration::seconds(seconds))),
        TriggerConfig::Cron {
            expression,
            timezone,
        } => {
            let cron = CronExpression::parse(&expression)
                .map_err(|e| tempo_core::error::CoreError::Validation(e.to_string()))?;
            let tz = parse_timezone(&timezone)
                .map_err(|e| tempo_core::error::CoreError::Validation(e.to_string()))?;
            Ok(cron.next_after(base, tz))
        }
        TriggerConfig::Manual | TriggerConfig::Startup => Ok(None),
    }
}

/// One previewed fire time, in UTC and rendered in the trigger's zone.
#[derive(Debug, Serialize)]
pub struct PreviewRun {
    pub time: DateTime<Utc>,
    pub local: String,
}

/// Result of the cron validation endpoint.
#[derive(Debug, Serialize)]
pub struct CronPreview {
    pub valid: bool,
    pub next_runs: Vec<PreviewRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validate a cron expression and preview its next fires.
///
/// Pure: uses the same parser as the scheduler, so the preview always
/// matches what would actually fire.
pub fn validate_and_preview(expression: &str, timezone: &str) -> CronPreview {
    let tz: Tz = match parse_timezone(timezone) {
        Ok(tz) => tz,
        Err(e) => {
            return CronPreview {
                valid: false,
                next_runs: vec![],
                error: Some(e.to_string()),
            }
        }
    };

    match CronExpression::parse(expression) {
        Ok(cron) => {
            let next_runs = cron
                .preview(Utc::now(), tz, PREVIEW_COUNT)
                .into_iter()
                .map(|time| PreviewRun {
                    local: time
                        .with_timezone(&tz)
                        .format("%Y-%m-%d %H:%M:%S %Z")
                        .to_string(),
                    time,
                })
                .collect();
            CronPreview {
                valid: true,
                next_runs,
                error: None,
            }
        }
        Err(e) => CronPreview {
            valid: false,
            next_runs: vec![],
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trigger_with(kind: &str, config: serde_json::Value, last_fired_at: Option<Timestamp>) -> Trigger {
        Trigger {
            id: 1,
            script_id: 1,
            kind: kind.to_string(),
            config_json: config.to_string(),
            enabled: true,
            created_at: Utc::now(),
            last_fired_at,
            next_fire_at: None,
        }
    }

    #[test]
    fn interval_first_arming_is_now_plus_seconds() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let trigger = trigger_with("interval", serde_json::json!({"seconds": 2}), None);

        let next = compute_next_fire(&trigger, now).unwrap().unwrap();
        assert_eq!(next, now + ChronoDuration::seconds(2));
    }

    #[test]
    fn interval_rearm_is_strictly_after_last_fire() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();

        // Recent fire in the past: schedule from now (no replay of the
        // backlog).
        let trigger = trigger_with(
            "interval",
            serde_json::json!({"seconds": 30}),
            Some(now - ChronoDuration::seconds(500)),
        );
        let next = compute_next_fire(&trigger, now).unwrap().unwrap();
        assert_eq!(next, now + ChronoDuration::seconds(30));
        assert!(next > trigger.last_fired_at.unwrap());
    }

    #[test]
    fn cron_next_fire_respects_timezone() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let trigger = trigger_with(
            "cron",
            serde_json::json!({"expression": "0 8 * * *", "timezone": "Europe/Berlin"}),
            None,
        );

        // 08:00 CEST == 06:00 UTC.
        let next = compute_next_fire(&trigger, now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 6, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn manual_and_startup_never_arm() {
        let now = Utc::now();
        for kind in ["manual", "startup"] {
            let trigger = trigger_with(kind, serde_json::json!({}), None);
            assert_eq!(compute_next_fire(&trigger, now).unwrap(), None);
        }
    }

    #[test]
    fn invalid_cron_config_is_an_error() {
        let now = Utc::now();
        let trigger = trigger_with(
            "cron",
            serde_json::json!({"expression": "not a cron"}),
            None,
        );
        assert!(compute_next_fire(&trigger, now).is_err());

        let trigger = trigger_with(
            "cron",
            serde_json::json!({"expression": "* * * * *", "timezone": "Mars/Olympus"}),
            None,
        );
        assert!(compute_next_fire(&trigger, now).is_err());
    }

    #[test]
    fn preview_matches_scheduler_parser() {
        let preview = validate_and_preview("*/5 * * * *", "UTC");
        assert!(preview.valid);
        assert_eq!(preview.next_runs.len(), 5);
        for run in &preview.next_runs {
            assert_eq!(run.time.timestamp() % 300, 0);
            assert!(run.time > Utc::now() - ChronoDuration::seconds(1));
        }
    }

    #[test]
    fn preview_rejects_bad_input() {
        let preview = validate_and_preview("* * *", "UTC");
        assert!(!preview.valid);
        assert!(preview.error.is_some());

        let preview = validate_and_preview("* * * * *", "Not/AZone");
        assert!(!preview.valid);
    }
}
