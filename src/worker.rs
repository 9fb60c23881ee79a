use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::delivery::{DeliveryError, Transport, installation_token};
use crate::error::StoreError;
use crate::models::QueueEntry;
use crate::store::{FailureOutcome, Store};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub delivery_timeout: Duration,
    pub error_backoff: Duration,
    pub default_token: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
            default_token: "unknown".to_string(),
        }
    }
}

/// What one pass of the worker did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// Nothing eligible.
    Idle,
    /// The entry was claimed elsewhere between lookup and claim.
    LostRace,
    Attempted(Attempt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Delivered,
    Failed(FailureOutcome),
    /// The store no longer had the entry in flight when the result came back.
    Orphaned,
}

pub struct Worker {
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(store: Arc<Store>, transport: Arc<dyn Transport>, settings: WorkerSettings) -> Self {
        Self {
            store,
            transport,
            settings,
        }
    }

    /// Run the delivery loop as a tokio task until `shutdown` flips to true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Delivery worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.process_next().await {
                Ok(Cycle::Idle) => {
                    tokio::select! {
                        reachable = self.transport.probe() => {
                            if !reachable {
                                tracing::warn!("Delivery endpoint unreachable, will keep polling");
                            }
                        }
                        res = shutdown.changed() => {
                            if res.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                    Some(self.settings.poll_interval)
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::error!("Delivery worker error: {e}");
                    Some(self.settings.error_backoff)
                }
            };

            if let Some(wait) = wait {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.store.wait_for_work() => {}
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Delivery worker stopped");
    }

    /// Claim and attempt the next eligible entry, if any.
    pub async fn process_next(&self) -> Result<Cycle, StoreError> {
        let Some(entry) = self.store.next_ready().await? else {
            tracing::debug!("No eligible entries");
            return Ok(Cycle::Idle);
        };

        if !self.store.begin_delivery(entry.id).await? {
            tracing::debug!("Entry {} was claimed elsewhere", entry.id);
            return Ok(Cycle::LostRace);
        }

        tracing::info!(
            "Delivering {} (attempt {}, {} bytes)",
            entry.id,
            entry.retry_count + 1,
            entry.size_bytes
        );

        let attempt = self.attempt(&entry).await?;
        Ok(Cycle::Attempted(attempt))
    }

    async fn attempt(&self, entry: &QueueEntry) -> Result<Attempt, StoreError> {
        let payload = match tokio::fs::read(&entry.bundle_ref).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                let error = format!("Bundle unreadable at {}: {e}", entry.bundle_ref);
                tracing::warn!("{}: {error}; failing without retry", entry.id);
                let outcome = self
                    .store
                    .report_unrecoverable(entry.id, &error)
                    .await
                    .inspect_err(|e| stuck(entry, e))?;
                return Ok(self.failed(entry, outcome));
            }
        };

        let token = installation_token(&payload)
            .unwrap_or_else(|| self.settings.default_token.clone());

        let result = match tokio::time::timeout(
            self.settings.delivery_timeout,
            self.transport.deliver(payload, &token),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        };

        match result {
            Ok(delivered) => {
                let completed = self
                    .store
                    .report_success(entry.id)
                    .await
                    .inspect_err(|e| stuck(entry, e))?;
                if completed {
                    tracing::info!("Delivered {} (HTTP {})", entry.id, delivered.status);
                    Ok(Attempt::Delivered)
                } else {
                    tracing::warn!("Delivered {} but it was no longer in flight", entry.id);
                    Ok(Attempt::Orphaned)
                }
            }
            Err(e) => {
                let error = e.to_string();
                let outcome = self
                    .store
                    .report_failure(entry.id, &error)
                    .await
                    .inspect_err(|e| stuck(entry, e))?;
                Ok(self.failed(entry, outcome))
            }
        }
    }

    fn failed(&self, entry: &QueueEntry, outcome: Option<FailureOutcome>) -> Attempt {
        match outcome {
            Some(outcome) => {
                match &outcome {
                    FailureOutcome::Rescheduled {
                        retry_count,
                        next_eligible_at,
                    } => tracing::info!(
                        "Delivery of {} failed (retry {retry_count}), next attempt at {next_eligible_at}",
                        entry.id
                    ),
                    FailureOutcome::Failed {
                        retry_count,
                        archived_to,
                    } => tracing::warn!(
                        "Delivery of {} failed permanently after {retry_count} attempts (archived: {})",
                        entry.id,
                        archived_to
                            .as_ref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "no".to_string())
                    ),
                }
                Attempt::Failed(outcome)
            }
            None => {
                tracing::warn!("Failure of {} reported after it left in flight", entry.id);
                Attempt::Orphaned
            }
        }
    }
}

fn stuck(entry: &QueueEntry, e: &StoreError) {
    tracing::error!(
        "Could not record outcome for {}: {e}; it stays in flight until the next restart",
        entry.id
    );
}
