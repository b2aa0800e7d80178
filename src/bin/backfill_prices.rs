use dotenvy::dotenv;
use eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use holdings_tracker::config;
use holdings_tracker::db::connection;
use holdings_tracker::db::queries::changes as change_queries;
use holdings_tracker::enrich::PriceContextEnricher;
use holdings_tracker::logging;
use holdings_tracker::sources::http::HttpClients;

const BATCH_LIMIT: i64 = 500;

/// Retries price-range enrichment for persisted changes whose providers were
/// unavailable at ingestion time. Safe to re-run; the range columns are the
/// only thing it touches.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    if let Err(e) = logging::init_logging(env!("CARGO_BIN_NAME").to_string()) {
        eprintln!("Failed to initialize logging: {}", e);
        return Err(e);
    }

    let cfg = config::Config::load();
    let pool = connection::create_pool(&cfg).await?;
    let clients = Arc::new(HttpClients::new(&cfg));
    let enricher = PriceContextEnricher::new(&clients, &cfg);

    let pending = change_queries::changes_missing_price_range(&pool, BATCH_LIMIT).await?;
    info!(pending = pending.len(), "Starting price range backfill");

    let mut filled = 0usize;
    for change in &pending {
        // Without a baseline date there is no window to price.
        let Some(from) = change.from_date else {
            debug!(change_id = change.id, "Change has no from_date, skipping");
            continue;
        };
        if let Some(range) = enricher.window_range(&change.ticker, from, change.to_date).await {
            change_queries::update_price_range(&pool, change.id, range.low, range.high).await?;
            filled += 1;
        }
    }
    info!(
        pending = pending.len(),
        filled,
        still_missing = pending.len() - filled,
        "Price range backfill finished"
    );

    tokio::time::sleep(std::time::Duration::from_secs(1)).await; // Allow time for logging to flush
    Ok(())
}
