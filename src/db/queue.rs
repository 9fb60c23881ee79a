use sqlx::SqliteConnection;

use crate::models::queue_entry::QueueEntryRow;

pub struct NewEntry<'a> {
    pub id: &'a str,
    pub bundle_ref: &'a str,
    pub tier: i64,
    pub category_count: i64,
    pub size_bytes: i64,
    pub now: i64,
}

pub async fn insert(conn: &mut SqliteConnection, entry: &NewEntry<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO queue_entries
             (id, bundle_ref, created_at, tier, category_count, size_bytes, status, retry_count, next_eligible_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?3)",
    )
    .bind(entry.id)
    .bind(entry.bundle_ref)
    .bind(entry.now)
    .bind(entry.tier)
    .bind(entry.category_count)
    .bind(entry.size_bytes)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<QueueEntryRow>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntryRow>("SELECT * FROM queue_entries WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Earliest-created pending entry whose retry time has arrived.
pub async fn find_next_ready(
    conn: &mut SqliteConnection,
    now: i64,
) -> Result<Option<QueueEntryRow>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntryRow>(
        "SELECT * FROM queue_entries
         WHERE status = 'pending' AND next_eligible_at <= ?1
         ORDER BY seq ASC
         LIMIT 1",
    )
    .bind(now)
    .fetch_optional(conn)
    .await
}

/// Pending entry scheduled soonest, eligible or not.
pub async fn find_next_scheduled(
    conn: &mut SqliteConnection,
) -> Result<Option<QueueEntryRow>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntryRow>(
        "SELECT * FROM queue_entries
         WHERE status = 'pending'
         ORDER BY next_eligible_at ASC, seq ASC
         LIMIT 1",
    )
    .fetch_optional(conn)
    .await
}

pub async fn find_in_flight(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<QueueEntryRow>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntryRow>(
        "SELECT * FROM queue_entries WHERE id = ?1 AND status = 'in_flight'",
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// `(id, retry_count)` of every in-flight entry.
pub async fn list_in_flight(conn: &mut SqliteConnection) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        "SELECT id, retry_count FROM queue_entries WHERE status = 'in_flight' ORDER BY seq ASC",
    )
    .fetch_all(conn)
    .await
}

/// Claim a pending entry. Returns false if it was not pending.
pub async fn mark_in_flight(conn: &mut SqliteConnection, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queue_entries SET status = 'in_flight'
         WHERE id = ?1 AND status = 'pending'",
    )
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_completed(
    conn: &mut SqliteConnection,
    id: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queue_entries SET status = 'completed', completed_at = ?2
         WHERE id = ?1 AND status = 'in_flight'",
    )
    .bind(id)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn reschedule(
    conn: &mut SqliteConnection,
    id: &str,
    retry_count: i64,
    error: &str,
    next_eligible_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE queue_entries
         SET status = 'pending', retry_count = ?2, last_error = ?3, next_eligible_at = ?4
         WHERE id = ?1 AND status = 'in_flight'",
    )
    .bind(id)
    .bind(retry_count)
    .bind(error)
    .bind(next_eligible_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn mark_failed(
    conn: &mut SqliteConnection,
    id: &str,
    retry_count: i64,
    error: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE queue_entries
         SET status = 'failed', retry_count = ?2, last_error = ?3, failed_at = ?4
         WHERE id = ?1 AND status = 'in_flight'",
    )
    .bind(id)
    .bind(retry_count)
    .bind(error)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// Return every in-flight entry to pending, eligible at `now`.
pub async fn release_in_flight(conn: &mut SqliteConnection, now: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queue_entries SET status = 'pending', next_eligible_at = ?1
         WHERE status = 'in_flight'",
    )
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn count_by_status(conn: &mut SqliteConnection) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM queue_entries GROUP BY status",
    )
    .fetch_all(conn)
    .await
}

pub async fn delete_completed_before(
    conn: &mut SqliteConnection,
    cutoff: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM queue_entries WHERE status = 'completed' AND completed_at < ?1",
    )
    .bind(cutoff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn list_failed_before(
    conn: &mut SqliteConnection,
    cutoff: i64,
) -> Result<Vec<QueueEntryRow>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntryRow>(
        "SELECT * FROM queue_entries
         WHERE status = 'failed' AND failed_at < ?1
         ORDER BY seq ASC",
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await
}

pub async fn delete_failed(conn: &mut SqliteConnection, id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM queue_entries WHERE id = ?1 AND status = 'failed'")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn touch(conn: &mut SqliteConnection, now: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO queue_meta (key, value) VALUES ('last_updated', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn last_updated(conn: &mut SqliteConnection) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT value FROM queue_meta WHERE key = 'last_updated'")
        .fetch_optional(conn)
        .await
}
