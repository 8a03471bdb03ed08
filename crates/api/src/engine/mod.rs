//! The execution engine: run queue, worker pool, per-run lifecycle, and
//! the trigger scheduler.

pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod worker;

use chrono::{Duration, Utc};
use tempo_db::repositories::ExecutionRepo;
use tempo_db::DbPool;

/// How long a `running` record may predate boot before it is treated as
/// abandoned by a crashed worker.
const ORPHAN_GRACE_MINUTES: i64 = 5;

/// Boot-time reconciliation: rewrite orphaned `running` records to
/// `failed` with a marker stderr. Runs before the worker pool starts so
/// stale records can never block new runs.
pub async fn reconcile_abandoned_runs(pool: &DbPool) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::minutes(ORPHAN_GRACE_MINUTES);
    let reaped = ExecutionRepo::reap_abandoned(pool, cutoff).await?;
    if reaped > 0 {
        tracing::warn!(reaped, "Reconciled abandoned running records from previous boot");
    }
    Ok(reaped)
}
