pub mod providers;

use chrono::NaiveDate;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::diff::HoldingsDelta;
use crate::sources::http::HttpClients;
use providers::{PolygonProvider, PriceProvider, PriceRange, StooqProvider};

struct CachedRange {
    fetched_at: Instant,
    range: Option<PriceRange>,
}

/// Attaches market low/high context to diffs, strictly best-effort: a
/// provider chain is walked in order and any failure degrades to a null
/// range, leaving the change eligible for a later backfill pass.
///
/// Responses are cached per (ticker, provider) for a short TTL to absorb
/// bursts when many changes for the same ticker are enriched in one run.
pub struct PriceContextEnricher {
    providers: Vec<PriceProvider>,
    cache: DashMap<(String, &'static str), CachedRange>,
    ttl: Duration,
}

impl PriceContextEnricher {
    pub fn new(clients: &HttpClients, config: &Config) -> Self {
        Self {
            providers: vec![
                PriceProvider::Polygon(PolygonProvider::new(
                    clients.polygon.clone(),
                    config.polygon_api_key.clone(),
                )),
                PriceProvider::Stooq(StooqProvider::new(clients.stooq.clone())),
            ],
            cache: DashMap::new(),
            ttl: Duration::from_secs(config.price_cache_ttl_secs),
        }
    }

    #[cfg(test)]
    fn with_providers(providers: Vec<PriceProvider>, ttl: Duration) -> Self {
        Self {
            providers,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Market low/high for a ticker across a date window, or `None` when
    /// every provider comes up empty or fails.
    #[instrument(skip(self))]
    pub async fn window_range(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Option<PriceRange> {
        for provider in &self.providers {
            let cache_key = (ticker.to_string(), provider.name());
            if let Some(cached) = self.cache.get(&cache_key) {
                if cached.fetched_at.elapsed() <= self.ttl {
                    if let Some(range) = cached.range {
                        return Some(range);
                    }
                    continue; // cached miss: try the next provider
                }
            }

            match provider.window_range(ticker, from, to).await {
                Ok(result) => {
                    self.cache.insert(
                        cache_key,
                        CachedRange {
                            fetched_at: Instant::now(),
                            range: result,
                        },
                    );
                    if let Some(range) = result {
                        debug!(ticker, provider = provider.name(), "Price range fetched");
                        return Some(range);
                    }
                }
                Err(e) => {
                    // Failures are not cached so the next run retries cleanly.
                    warn!(ticker, provider = provider.name(), error = %e, "Price provider failed, trying next");
                }
            }
        }
        None
    }

    /// Fill price context on a run's changes in place. Never fails; changes
    /// whose window can't be priced keep a null range.
    pub async fn enrich(&self, changes: &mut [HoldingsDelta], from: NaiveDate, to: NaiveDate) {
        for change in changes.iter_mut() {
            if let Some(range) = self.window_range(&change.ticker, from, to).await {
                change.price_range_low = Some(range.low);
                change.price_range_high = Some(range.high);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn empty_chain_yields_none() {
        let enricher = PriceContextEnricher::with_providers(vec![], Duration::from_secs(60));
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert!(enricher.window_range("AAPL", from, to).await.is_none());
    }

    #[tokio::test]
    async fn cached_range_is_served_within_ttl() {
        use providers::StaticProvider;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let provider = PriceProvider::Static(StaticProvider {
            range: Some(PriceRange {
                low: dec!(168.4),
                high: dec!(176.1),
            }),
            calls: calls.clone(),
        });
        let enricher =
            PriceContextEnricher::with_providers(vec![provider], Duration::from_secs(60));
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let first = enricher.window_range("AAPL", from, to).await.unwrap();
        let second = enricher.window_range("AAPL", from, to).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.low, dec!(168.4));
        // Second call within the TTL must be served from the cache.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enrich_leaves_null_range_on_total_failure() {
        let enricher = PriceContextEnricher::with_providers(vec![], Duration::from_secs(60));
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let mut changes = vec![crate::diff::HoldingsDelta {
            key: "AAPL".into(),
            ticker: "AAPL".into(),
            change_type: crate::diff::ChangeType::Added,
            shares_before: Some(dec!(100)),
            shares_after: Some(dec!(200)),
            shares_delta: dec!(100),
            shares_delta_percent: Some(dec!(100)),
            weight_before: None,
            weight_after: None,
            weight_delta: None,
            value_before: None,
            value_after: None,
            value_delta: None,
            price_range_low: None,
            price_range_high: None,
        }];
        enricher.enrich(&mut changes, from, to).await;
        assert!(changes[0].price_range_low.is_none());
        assert!(changes[0].price_range_high.is_none());
    }
}
