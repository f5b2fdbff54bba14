//! stagehand - personal download dashboard
//!
//! Tracks torrent downloads requested by the user, reconciles them against a
//! Transmission RPC endpoint by derived content identifier, and on completion
//! moves the finished files from the client's staging directory into the
//! series/movies library.

mod api;
mod app;
mod config;
mod db;
mod services;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::db::Database;
use crate::services::{
    DownloadService, FinalizeWorkerConfig, LibraryRoots, RsyncMover, TransmissionClient,
    start_finalize_worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagehand=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting stagehand");

    let db = Database::connect(&config.database_path).await?;
    tracing::info!("Database ready at {}", config.database_path);

    let client = Arc::new(TransmissionClient::new(
        &config.transmission_url,
        config.transmission_username.clone(),
        config.transmission_password.clone(),
    ));
    tracing::info!("Transmission client configured for {}", config.transmission_url);

    // The worker handle must outlive the server; dropping it aborts the loop.
    let (finalize_queue, finalize_worker) = start_finalize_worker(
        FinalizeWorkerConfig {
            queue_capacity: config.finalize_queue_capacity,
            max_concurrent: config.finalize_max_concurrent,
        },
        Arc::new(RsyncMover::new()),
    );

    let downloads = Arc::new(DownloadService::new(
        db.clone(),
        client,
        finalize_queue,
        LibraryRoots {
            series: PathBuf::from(&config.series_root),
            movies: PathBuf::from(&config.movies_root),
        },
    ));

    let state = AppState { db, downloads };
    let app = app::build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    finalize_worker.stop().await;
    Ok(())
}
