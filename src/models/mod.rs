pub mod history;
pub mod queue_entry;

pub use history::HistoryRecord;
pub use queue_entry::{EntryStatus, EntrySummary, QueueEntry, StatusSummary};

use chrono::{DateTime, Utc};

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| format!("timestamp out of range: {ms}"))
}

pub(crate) fn from_millis_opt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, String> {
    ms.map(from_millis).transpose()
}
