use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{HistoryRecord, QueueEntry, StatusSummary};
use crate::retention::{self, CleanupReport, RetentionPolicy};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub bundle_ref: String,
    pub tier: i64,
    pub category_count: i64,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct CleanupRequest {
    pub completed_days: Option<i64>,
    pub failed_days: Option<i64>,
}

pub async fn enqueue(
    State(state): State<SharedState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.bundle_ref.trim().is_empty() {
        return Err(AppError::BadRequest("bundle_ref is required".to_string()));
    }
    if req.tier < 0 || req.category_count < 0 {
        return Err(AppError::BadRequest(
            "tier and category_count must not be negative".to_string(),
        ));
    }

    let id = state
        .store
        .enqueue(&req.bundle_ref, req.tier, req.category_count)
        .await?;

    Ok(Json(json!({ "id": id.to_string() })))
}

pub async fn status(State(state): State<SharedState>) -> Result<Json<StatusSummary>, AppError> {
    Ok(Json(state.store.status_summary().await?))
}

pub async fn get_entry(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueEntry>, AppError> {
    let entry = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue entry not found".to_string()))?;
    Ok(Json(entry))
}

pub async fn history(
    State(state): State<SharedState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryRecord>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.store.history(limit).await?))
}

/// Purge terminal entries. Missing day counts fall back to the configured
/// retention.
pub async fn cleanup(
    State(state): State<SharedState>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<CleanupReport>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let defaults = state.config.retention;

    let policy = RetentionPolicy {
        completed: retention_days(req.completed_days, defaults.completed)?,
        failed: retention_days(req.failed_days, defaults.failed)?,
    };

    let report = retention::run(&state.store, &policy).await?;
    Ok(Json(report))
}

fn retention_days(
    days: Option<i64>,
    default: chrono::Duration,
) -> Result<chrono::Duration, AppError> {
    match days {
        None => Ok(default),
        Some(d) if d < 0 => Err(AppError::BadRequest(
            "Retention days must not be negative".to_string(),
        )),
        Some(d) => chrono::Duration::try_days(d).ok_or_else(|| {
            AppError::BadRequest(format!("Retention of {d} days is out of range"))
        }),
    }
}
