pub mod archive;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod models;
pub mod retention;
pub mod retry;
pub mod routes;
pub mod state;
pub mod store;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::archive::Archive;
use crate::config::Config;
use crate::error::StoreError;
use crate::state::{AppState, SharedState};
use crate::store::Store;

/// Open the store described by `config` and reconcile entries a previous
/// process left in flight.
pub async fn open_store(config: &Config) -> Result<Arc<Store>, StoreError> {
    let store = Store::open(
        &config.database_path,
        config.retry.clone(),
        Archive::new(&config.archive_dir),
    )
    .await?;
    store.recover_in_flight().await?;
    Ok(Arc::new(store))
}

pub fn build_app(store: Arc<Store>, config: Config) -> (Router, SharedState) {
    let state: SharedState = Arc::new(AppState { store, config });

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state.clone());

    (app, state)
}

async fn health() -> &'static str {
    "ok"
}
