use dotenvy::dotenv;
use eyre::Result;
use tracing::info;

use holdings_tracker::config;
use holdings_tracker::db::connection;
use holdings_tracker::logging;
use holdings_tracker::scheduler::IngestionScheduler;

/// On-demand ingestion for a single investor, e.g. right after onboarding:
/// `ingest_investor <investor_id>`.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    if let Err(e) = logging::init_logging(env!("CARGO_BIN_NAME").to_string()) {
        eprintln!("Failed to initialize logging: {}", e);
        return Err(e);
    }

    let investor_id: i32 = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre::eyre!("usage: ingest_investor <investor_id>"))?
        .parse()
        .map_err(|_| eyre::eyre!("investor_id must be an integer"))?;

    let cfg = config::Config::load();
    let pool = connection::create_pool(&cfg).await?;
    let scheduler = IngestionScheduler::init(&cfg, pool).await?;
    info!(investor_id, "Starting on-demand ingestion run");

    let reports = scheduler.run_investor(investor_id).await?;
    for report in &reports {
        info!(
            source_id = report.source_id,
            state = %report.state,
            changes = report.change_count,
            error = report.error.as_deref().unwrap_or("none"),
            "Run finished"
        );
    }

    tokio::time::sleep(std::time::Duration::from_secs(1)).await; // Allow time for logging to flush
    Ok(())
}
