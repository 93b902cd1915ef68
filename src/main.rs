// ─────────────────────────────────────────────────────────────────────────────
// okx-ingestor: single-venue market-data ingestion service
// ─────────────────────────────────────────────────────────────────────────────
mod batcher;
mod book;
mod book_handler;
mod channels;
mod config;
mod error;
mod frame;
mod metrics;
mod model;
mod parse;
mod scheduler;
mod session;
mod storage;
mod supervisor;
mod writer;

use std::sync::Arc;

use config::Config;
use storage::sqlite::SqliteWriter;
use supervisor::Supervisor;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    tracing::info!("okx-ingestor starting...");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        ws_url = %config.ws_url,
        instruments = ?config.instruments,
        batch_max_size = config.batch_max_size,
        flush_interval_ms = config.flush_interval_ms,
        "configuration loaded"
    );

    let writer = match SqliteWriter::open(&config.sqlite_path) {
        Ok(w) => Arc::new(w),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize writer");
            std::process::exit(1);
        }
    };

    let supervisor = Supervisor::new(config, writer);
    if let Err(e) = supervisor.run().await {
        tracing::error!(error = %e, "supervisor exited with error");
        std::process::exit(1);
    }
}
