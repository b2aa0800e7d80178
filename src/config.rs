use dotenvy::dotenv;
use std::env;

pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    /// SEC EDGAR rejects requests without a descriptive User-Agent.
    pub sec_user_agent: String,
    pub openfigi_api_key: Option<String>,
    pub polygon_api_key: Option<String>,
    pub max_concurrent_runs: usize,
    pub max_fetch_retries: u32,
    pub run_timeout_secs: u64,
    pub ingest_interval_secs: u64,
    pub price_cache_ttl_secs: u64,
}

impl Config {
    pub fn load() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("Missing DATABASE_URL");
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let sec_user_agent = env::var("SEC_USER_AGENT")
            .unwrap_or_else(|_| "holdings-tracker/0.1 (ops@holdings-tracker.dev)".to_string());

        let openfigi_api_key = env::var("OPENFIGI_API_KEY").ok().filter(|k| !k.is_empty());
        let polygon_api_key = env::var("POLYGON_API_KEY").ok().filter(|k| !k.is_empty());

        let max_concurrent_runs = env::var("MAX_CONCURRENT_RUNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);
        let max_fetch_retries = env::var("MAX_FETCH_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        let run_timeout_secs = env::var("RUN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);
        let ingest_interval_secs = env::var("INGEST_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);
        let price_cache_ttl_secs = env::var("PRICE_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        Config {
            database_url,
            redis_url,
            sec_user_agent,
            openfigi_api_key,
            polygon_api_key,
            max_concurrent_runs,
            max_fetch_retries,
            run_timeout_secs,
            ingest_interval_secs,
            price_cache_ttl_secs,
        }
    }
}
