//! The fixed-size worker pool draining the run queue.
//!
//! Workers are symmetric: each loops taking the next request off the
//! shared receiver and driving it through the runner. The number of
//! concurrent active runs is exactly the pool size.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::queue::SharedQueueReceiver;
use crate::engine::runner::{execute_request, RunContext};

/// Spawn `count` workers. Each exits when `cancel` fires or the queue
/// closes; in-flight runs complete (or time out) first.
pub fn spawn_pool(
    count: usize,
    receiver: SharedQueueReceiver,
    ctx: RunContext,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let receiver = receiver.clone();
            let ctx = ctx.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                tracing::info!(worker_id, "worker started");
                loop {
                    // Hold the receiver lock only while waiting for the
                    // next request, never across a run.
                    let request = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            request = rx.recv() => match request {
                                Some(request) => request,
                                None => break,
                            },
                        }
                    };

                    tracing::debug!(
                        worker_id,
                        script_id = request.script_id,
                        request_id = %request.request_id,
                        "worker claimed run request"
                    );
                    execute_request(&ctx, request).await;
                }
                tracing::info!(worker_id, "worker stopped");
            })
        })
        .collect()
}
