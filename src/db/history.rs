use sqlx::SqliteConnection;

use crate::models::history::HistoryRow;

pub async fn append(
    conn: &mut SqliteConnection,
    entry_id: &str,
    outcome: &str,
    retry_count: i64,
    detail: Option<&str>,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO delivery_history (entry_id, outcome, retry_count, detail, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(entry_id)
    .bind(outcome)
    .bind(retry_count)
    .bind(detail)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list_recent(
    conn: &mut SqliteConnection,
    limit: i64,
) -> Result<Vec<HistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, HistoryRow>(
        "SELECT * FROM delivery_history ORDER BY id DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(conn)
    .await
}

pub async fn list_by_entry(
    conn: &mut SqliteConnection,
    entry_id: &str,
) -> Result<Vec<HistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, HistoryRow>(
        "SELECT * FROM delivery_history WHERE entry_id = ?1 ORDER BY id ASC",
    )
    .bind(entry_id)
    .fetch_all(conn)
    .await
}
