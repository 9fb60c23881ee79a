use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{from_millis, from_millis_opt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::InFlight => "in_flight",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Failed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "in_flight" => Ok(EntryStatus::InFlight),
            "completed" => Ok(EntryStatus::Completed),
            "failed" => Ok(EntryStatus::Failed),
            other => Err(format!("unknown entry status '{other}'")),
        }
    }
}

/// One bundle awaiting (or done with) delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub bundle_ref: String,
    pub created_at: DateTime<Utc>,
    pub tier: i64,
    pub category_count: i64,
    pub size_bytes: i64,
    pub status: EntryStatus,
    pub retry_count: i64,
    pub next_eligible_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Raw `queue_entries` row. Timestamps are unix milliseconds.
#[derive(Debug, sqlx::FromRow)]
pub struct QueueEntryRow {
    pub id: String,
    pub bundle_ref: String,
    pub created_at: i64,
    pub tier: i64,
    pub category_count: i64,
    pub size_bytes: i64,
    pub status: String,
    pub retry_count: i64,
    pub next_eligible_at: i64,
    pub last_error: Option<String>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = String;

    fn try_from(row: QueueEntryRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id).map_err(|e| format!("bad entry id '{}': {e}", row.id))?;
        Ok(QueueEntry {
            id,
            bundle_ref: row.bundle_ref,
            created_at: from_millis(row.created_at)?,
            tier: row.tier,
            category_count: row.category_count,
            size_bytes: row.size_bytes,
            status: row.status.parse()?,
            retry_count: row.retry_count,
            next_eligible_at: from_millis(row.next_eligible_at)?,
            last_error: row.last_error,
            completed_at: from_millis_opt(row.completed_at)?,
            failed_at: from_millis_opt(row.failed_at)?,
        })
    }
}

/// Operator-facing view of the entry the worker will pick up next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub tier: i64,
    pub category_count: i64,
    pub size_bytes: i64,
    pub retry_count: i64,
    pub next_eligible_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl From<&QueueEntry> for EntrySummary {
    fn from(entry: &QueueEntry) -> Self {
        EntrySummary {
            id: entry.id,
            created_at: entry.created_at,
            tier: entry.tier,
            category_count: entry.category_count,
            size_bytes: entry.size_bytes,
            retry_count: entry.retry_count,
            next_eligible_at: entry.next_eligible_at,
            last_error: entry.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub pending_count: i64,
    pub in_flight_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub next_ready: Option<EntrySummary>,
    pub last_updated: Option<DateTime<Utc>>,
}
