//! Durable queue state.
//!
//! Every mutation takes `write_lock` and runs in a single SQLite transaction,
//! so transitions are linearizable and either fully applied or not at all.
//! Reads go straight to the pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::archive::Archive;
use crate::db;
use crate::db::queue::NewEntry;
use crate::error::StoreError;
use crate::models::history::{HistoryRow, outcome};
use crate::models::queue_entry::QueueEntryRow;
use crate::models::{EntryStatus, EntrySummary, HistoryRecord, QueueEntry, StatusSummary};
use crate::retry::{RetryDecision, RetryPolicy};

/// Result of reporting a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    Rescheduled {
        retry_count: i64,
        next_eligible_at: DateTime<Utc>,
    },
    Failed {
        retry_count: i64,
        archived_to: Option<PathBuf>,
    },
}

pub struct Store {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    work_ready: Notify,
    retry: RetryPolicy,
    archive: Archive,
}

impl Store {
    /// Open (or create) the queue database at `path` and apply migrations.
    pub async fn open(path: &Path, retry: RetryPolicy, archive: Archive) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Queue store opened at {}", path.display());

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
            work_ready: Notify::new(),
            retry,
            archive,
        })
    }

    /// Direct pool access, for tests that need to rewrite timestamps.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Resolves after the next `enqueue`, or immediately if one happened
    /// since the last wait.
    pub async fn wait_for_work(&self) {
        self.work_ready.notified().await;
    }

    pub async fn enqueue(
        &self,
        bundle_ref: &str,
        tier: i64,
        category_count: i64,
    ) -> Result<Uuid, StoreError> {
        let size_bytes = match tokio::fs::metadata(bundle_ref).await {
            Ok(meta) => i64::try_from(meta.len()).unwrap_or(i64::MAX),
            Err(e) => {
                tracing::warn!("Cannot stat bundle {bundle_ref}: {e}");
                0
            }
        };

        let id = Uuid::now_v7();
        let id_str = id.to_string();
        let now = now_ms();

        {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            db::queue::insert(
                &mut tx,
                &NewEntry {
                    id: &id_str,
                    bundle_ref,
                    tier,
                    category_count,
                    size_bytes,
                    now,
                },
            )
            .await?;
            db::queue::touch(&mut tx, now).await?;
            tx.commit().await?;
        }

        self.work_ready.notify_one();
        tracing::info!(
            "Queued {id} ({size_bytes} bytes, tier {tier}, {category_count} categories)"
        );
        Ok(id)
    }

    /// Earliest-created pending entry that is eligible now.
    pub async fn next_ready(&self) -> Result<Option<QueueEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::queue::find_next_ready(&mut conn, now_ms())
            .await?
            .map(decode_entry)
            .transpose()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<QueueEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::queue::find_by_id(&mut conn, &id.to_string())
            .await?
            .map(decode_entry)
            .transpose()
    }

    /// Claim `id` for delivery. `false` means it was not pending, usually
    /// because someone else claimed it first.
    pub async fn begin_delivery(&self, id: Uuid) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        if !db::queue::mark_in_flight(&mut tx, &id.to_string()).await? {
            return Ok(false);
        }
        db::queue::touch(&mut tx, now_ms()).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// `in_flight -> completed`. `false` (and no change) if not in flight.
    pub async fn report_success(&self, id: Uuid) -> Result<bool, StoreError> {
        let id_str = id.to_string();
        let now = now_ms();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let Some(row) = db::queue::find_in_flight(&mut tx, &id_str).await? else {
            return Ok(false);
        };
        db::queue::mark_completed(&mut tx, &id_str, now).await?;
        db::history::append(&mut tx, &id_str, outcome::COMPLETED, row.retry_count, None, now)
            .await?;
        db::queue::touch(&mut tx, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Record a failed attempt and apply the retry policy. `None` if the
    /// entry was not in flight.
    pub async fn report_failure(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<Option<FailureOutcome>, StoreError> {
        self.record_failure(id, error, false).await
    }

    /// Like `report_failure`, but terminal regardless of the retry budget.
    /// Used when the payload itself is gone.
    pub async fn report_unrecoverable(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<Option<FailureOutcome>, StoreError> {
        self.record_failure(id, error, true).await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        terminal: bool,
    ) -> Result<Option<FailureOutcome>, StoreError> {
        let id_str = id.to_string();
        let now = now_ms();

        let guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let Some(row) = db::queue::find_in_flight(&mut tx, &id_str).await? else {
            return Ok(None);
        };

        let retry_count = row.retry_count + 1;
        let decision = if terminal {
            RetryDecision::GiveUp
        } else {
            self.retry.decide(retry_count)
        };

        match decision {
            RetryDecision::RetryAfter(delay) => {
                let next = now.saturating_add(duration_ms(delay));
                db::queue::reschedule(&mut tx, &id_str, retry_count, error, next).await?;
                db::history::append(
                    &mut tx,
                    &id_str,
                    outcome::RETRY_SCHEDULED,
                    retry_count,
                    Some(error),
                    now,
                )
                .await?;
                db::queue::touch(&mut tx, now).await?;
                tx.commit().await?;

                Ok(Some(FailureOutcome::Rescheduled {
                    retry_count,
                    next_eligible_at: timestamp(next)?,
                }))
            }
            RetryDecision::GiveUp => {
                db::queue::mark_failed(&mut tx, &id_str, retry_count, error, now).await?;
                db::history::append(
                    &mut tx,
                    &id_str,
                    outcome::FAILED,
                    retry_count,
                    Some(error),
                    now,
                )
                .await?;
                db::queue::touch(&mut tx, now).await?;
                tx.commit().await?;
                drop(guard);

                let archived_to = match self.archive.relocate(id, &row.bundle_ref).await {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::warn!("Could not archive payload of {id}: {e}");
                        None
                    }
                };

                Ok(Some(FailureOutcome::Failed {
                    retry_count,
                    archived_to,
                }))
            }
        }
    }

    /// Return entries orphaned in flight by a previous process to pending,
    /// eligible immediately. Run once at startup, before the worker.
    pub async fn recover_in_flight(&self) -> Result<u64, StoreError> {
        let now = now_ms();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let orphans = db::queue::list_in_flight(&mut tx).await?;
        if orphans.is_empty() {
            return Ok(0);
        }

        let released = db::queue::release_in_flight(&mut tx, now).await?;
        for (id, retry_count) in &orphans {
            db::history::append(
                &mut tx,
                id,
                outcome::RECOVERED,
                *retry_count,
                Some("in flight at startup"),
                now,
            )
            .await?;
        }
        db::queue::touch(&mut tx, now).await?;
        tx.commit().await?;

        tracing::warn!("Recovered {released} entries left in flight by a previous run");
        Ok(released)
    }

    /// Counts, next entry and last update, read from one snapshot.
    pub async fn status_summary(&self) -> Result<StatusSummary, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut summary = StatusSummary {
            pending_count: 0,
            in_flight_count: 0,
            completed_count: 0,
            failed_count: 0,
            next_ready: None,
            last_updated: None,
        };

        for (status, count) in db::queue::count_by_status(&mut tx).await? {
            let status: EntryStatus = status.parse().map_err(StoreError::Corrupt)?;
            match status {
                EntryStatus::Pending => summary.pending_count = count,
                EntryStatus::InFlight => summary.in_flight_count = count,
                EntryStatus::Completed => summary.completed_count = count,
                EntryStatus::Failed => summary.failed_count = count,
            }
        }

        let next = match db::queue::find_next_ready(&mut tx, now_ms()).await? {
            Some(row) => Some(row),
            None => db::queue::find_next_scheduled(&mut tx).await?,
        };
        summary.next_ready = next
            .map(decode_entry)
            .transpose()?
            .as_ref()
            .map(EntrySummary::from);

        summary.last_updated = db::queue::last_updated(&mut tx)
            .await?
            .map(timestamp)
            .transpose()?;
        tx.commit().await?;

        Ok(summary)
    }

    /// Delivery history, newest first.
    pub async fn history(&self, limit: i64) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::history::list_recent(&mut conn, limit)
            .await?
            .into_iter()
            .map(decode_history)
            .collect()
    }

    /// History of one entry, oldest first.
    pub async fn entry_history(&self, id: Uuid) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::history::list_by_entry(&mut conn, &id.to_string())
            .await?
            .into_iter()
            .map(decode_history)
            .collect()
    }

    /// Delete completed entries whose `completed_at` is older than
    /// `older_than`. Returns the number removed.
    pub async fn purge_completed(&self, older_than: chrono::Duration) -> Result<u64, StoreError> {
        let now = now_ms();
        let cutoff = now.saturating_sub(older_than.num_milliseconds());

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let removed = db::queue::delete_completed_before(&mut tx, cutoff).await?;
        if removed > 0 {
            db::queue::touch(&mut tx, now).await?;
        }
        tx.commit().await?;

        if removed > 0 {
            tracing::info!(
                "Purged {removed} completed entries older than {} days",
                older_than.num_days()
            );
        }
        Ok(removed)
    }

    /// Delete failed entries whose `failed_at` is older than `older_than`,
    /// archiving any payload still at its original location first. Entries
    /// whose payload cannot be archived are kept.
    pub async fn purge_failed(&self, older_than: chrono::Duration) -> Result<u64, StoreError> {
        let now = now_ms();
        let cutoff = now.saturating_sub(older_than.num_milliseconds());

        // Failed entries never change state, so archival runs unlocked.
        let expired = {
            let mut conn = self.pool.acquire().await?;
            db::queue::list_failed_before(&mut conn, cutoff).await?
        };

        let mut archived = Vec::with_capacity(expired.len());
        for row in expired {
            let entry = decode_entry(row)?;
            match self.archive.relocate(entry.id, &entry.bundle_ref).await {
                Ok(_) => archived.push(entry.id.to_string()),
                Err(e) => {
                    tracing::warn!("Keeping failed entry {}: payload not archived: {e}", entry.id)
                }
            }
        }

        if archived.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in &archived {
            removed += db::queue::delete_failed(&mut tx, id).await?;
        }

        if removed > 0 {
            db::queue::touch(&mut tx, now).await?;
        }
        tx.commit().await?;

        if removed > 0 {
            tracing::info!(
                "Purged {removed} failed entries older than {} days",
                older_than.num_days()
            );
        }
        Ok(removed)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    crate::models::from_millis(ms).map_err(StoreError::Corrupt)
}

fn decode_entry(row: QueueEntryRow) -> Result<QueueEntry, StoreError> {
    QueueEntry::try_from(row).map_err(StoreError::Corrupt)
}

fn decode_history(row: HistoryRow) -> Result<HistoryRecord, StoreError> {
    HistoryRecord::try_from(row).map_err(StoreError::Corrupt)
}
