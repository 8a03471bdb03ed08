//! Bounded retry for transient SQLite busy errors.
//!
//! SQLite has a single writer; under contention a statement can surface
//! `SQLITE_BUSY` even with the connection-level busy timeout. Writes on
//! the hot path (run finalization, trigger rearm) go through
//! [`with_backoff`], which retries busy errors with exponential delays
//! capped at roughly five seconds total, then gives up.

use std::future::Future;
use std::time::Duration;

/// First retry delay; doubles each attempt.
const INITIAL_DELAY: Duration = Duration::from_millis(50);

/// Attempt count. 50 + 100 + 200 + 400 + 800 + 1600 ms ≈ 3.2 s of
/// waiting across six retries, safely under the 5 s policy cap.
const MAX_ATTEMPTS: u32 = 7;

/// Run `op`, retrying while it fails with a busy/locked error.
pub async fn with_backoff<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut delay = INITIAL_DELAY;

    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_ATTEMPTS && is_busy(&e) => {
                tracing::warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "store busy, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("loop returns on the final attempt")
}

/// Is this a transient SQLITE_BUSY / SQLITE_LOCKED error?
pub fn is_busy(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            // Primary result codes 5 (SQLITE_BUSY) and 6 (SQLITE_LOCKED),
            // including extended variants like 517 (BUSY_SNAPSHOT).
            matches!(db.code().as_deref(), Some("5" | "6" | "261" | "517"))
                || db.message().contains("database is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, sqlx::Error>(42) }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_busy_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn row_not_found_is_not_busy() {
        assert!(!is_busy(&sqlx::Error::RowNotFound));
        assert!(!is_busy(&sqlx::Error::PoolTimedOut));
    }
}
