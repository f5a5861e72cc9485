use std::time::Duration;

use reviewflow::jobs::JobStatus;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::ServerClient;

/// Polls the job's server-side status and fires `token` once the owner has
/// cancelled it. Status errors are logged and retried on the next tick.
pub fn spawn_watcher(
    client: ServerClient,
    job_id: Uuid,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            match client.job_status(job_id).await {
                Ok(status) if status.status == JobStatus::Cancelled => {
                    tracing::info!(%job_id, "job cancelled by owner; stopping adapter");
                    token.cancel();
                    return;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(%job_id, error = %e, "cancellation check failed"),
            }
        }
    })
}
