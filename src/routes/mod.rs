pub mod queue;

use axum::Router;
use axum::routing::{get, post};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/queue", post(queue::enqueue))
        .route("/api/v1/queue/status", get(queue::status))
        .route("/api/v1/queue/entries/{id}", get(queue::get_entry))
        .route("/api/v1/queue/history", get(queue::history))
        .route("/api/v1/queue/cleanup", post(queue::cleanup))
}
