use anyhow::Result;
use energy_ingestion::{
    config::{AppConfig, StorageKind},
    http::{self, AppState},
    metrics_server, observability,
    store::{MemoryStore, PgStore, TelemetryBackend},
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing()?;

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    match cfg.storage.kind {
        StorageKind::Postgres => {
            let store = PgStore::connect(&cfg.database).await?;
            info!(
                max_connections = cfg.database.max_connections,
                min_connections = cfg.database.min_connections,
                "connected to postgres"
            );
            serve(store, &cfg).await
        }
        StorageKind::Memory => {
            warn!("using in-memory storage, telemetry is lost on shutdown");
            serve(MemoryStore::new(), &cfg).await
        }
    }
}

async fn serve<S: TelemetryBackend>(store: S, cfg: &AppConfig) -> Result<()> {
    let app = http::router(AppState::new(store, cfg.storage.kind));

    let listener = TcpListener::bind(&cfg.server.http_bind_addr).await?;
    info!(
        addr = %cfg.server.http_bind_addr,
        storage = cfg.storage.kind.as_str(),
        "energy ingestion engine listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, draining connections"),
        Err(e) => {
            warn!(error = %e, "failed to listen for ctrl-c, graceful shutdown disabled");
            std::future::pending::<()>().await;
        }
    }
}
