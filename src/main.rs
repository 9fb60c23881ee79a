use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use exportq::config::Config;
use exportq::delivery::HttpTransport;
use exportq::retention;
use exportq::worker::Worker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting exportq");
    tracing::info!("Delivering to {}", config.endpoint_url);

    let store = exportq::open_store(&config).await?;

    let transport = HttpTransport::new(
        config.endpoint_url.clone(),
        config.delivery_timeout,
        config.probe_url.clone(),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Worker::new(store.clone(), Arc::new(transport), config.worker_settings())
        .spawn(shutdown_rx.clone());

    let retention_task = config.cleanup_interval.map(|interval| {
        retention::spawn(store.clone(), config.retention, interval, shutdown_rx.clone())
    });

    let addr = SocketAddr::new(config.host, config.port);
    let (app, _state) = exportq::build_app(store.clone(), config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let an in-progress delivery finish before closing the store.
    let _ = shutdown_tx.send(true);
    let _ = worker.await;
    if let Some(task) = retention_task {
        let _ = task.await;
    }
    store.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
