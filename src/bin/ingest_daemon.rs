use dotenvy::dotenv;
use eyre::Result;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, instrument};

use holdings_tracker::config;
use holdings_tracker::db::connection;
use holdings_tracker::logging;
use holdings_tracker::scheduler::IngestionScheduler;

#[instrument(name = "ingest_daemon_main")]
#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    if let Err(e) = logging::init_logging(env!("CARGO_BIN_NAME").to_string()) {
        eprintln!("Failed to initialize logging: {}", e);
        return Err(e);
    }

    let cfg = config::Config::load();
    info!("Configuration loaded and logging initialized");

    let pool = connection::create_pool(&cfg).await?;
    info!("Database connection pool created");

    let scheduler = IngestionScheduler::init(&cfg, pool).await?;
    info!("Ingestion scheduler initialized");

    let mut ticker = interval(Duration::from_secs(cfg.ingest_interval_secs));
    info!(
        interval_secs = cfg.ingest_interval_secs,
        "Starting main ingestion loop"
    );

    loop {
        ticker.tick().await;

        match scheduler.run_batch().await {
            Ok(reports) => {
                let changes: usize = reports.iter().map(|r| r.change_count).sum();
                info!(runs = reports.len(), changes, "Ingestion batch completed");
            }
            Err(e) => {
                // Batch-level failures are setup problems (db listing), not
                // per-run ones; keep the daemon alive for the next tick.
                error!(error = %e, "Ingestion batch failed");
            }
        }
    }
}
