use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::store::Store;

/// How long terminal entries stay in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub completed: chrono::Duration,
    pub failed: chrono::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed: chrono::Duration::days(30),
            failed: chrono::Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub completed_removed: u64,
    pub failed_removed: u64,
}

pub async fn run(store: &Store, policy: &RetentionPolicy) -> Result<CleanupReport, StoreError> {
    let completed_removed = store.purge_completed(policy.completed).await?;
    let failed_removed = store.purge_failed(policy.failed).await?;
    Ok(CleanupReport {
        completed_removed,
        failed_removed,
    })
}

/// Apply `policy` every `interval` until shutdown.
pub fn spawn(
    store: Arc<Store>,
    policy: RetentionPolicy,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Retention task started (every {}s)", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match run(&store, &policy).await {
                        Ok(report) => tracing::debug!(
                            "Retention pass removed {} completed, {} failed",
                            report.completed_removed,
                            report.failed_removed
                        ),
                        Err(e) => tracing::error!("Retention pass failed: {e}"),
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Retention task stopped");
    })
}
