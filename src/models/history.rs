use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::from_millis;

/// Outcome kinds written to `delivery_history`.
pub mod outcome {
    pub const COMPLETED: &str = "completed";
    pub const RETRY_SCHEDULED: &str = "retry_scheduled";
    pub const FAILED: &str = "failed";
    pub const RECOVERED: &str = "recovered";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub entry_id: String,
    pub outcome: String,
    pub retry_count: i64,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct HistoryRow {
    pub id: i64,
    pub entry_id: String,
    pub outcome: String,
    pub retry_count: i64,
    pub detail: Option<String>,
    pub recorded_at: i64,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = String;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistoryRecord {
            id: row.id,
            entry_id: row.entry_id,
            outcome: row.outcome,
            retry_count: row.retry_count,
            detail: row.detail,
            recorded_at: from_millis(row.recorded_at)?,
        })
    }
}
