use dotenvy::dotenv;
use eyre::Result;
use tracing::info;

use holdings_tracker::config;
use holdings_tracker::db::{connection, schema};
use holdings_tracker::logging;

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

    schema::init_schema(&pool).await?;
    info!("Database schema initialized");

    tokio::time::sleep(std::time::Duration::from_secs(1)).await; // Allow time for logging to flush
    Ok(())
}
