pub mod aliases;
pub mod openfigi;

use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::db::models::identifier_mappings::IdentifierMappingModel;
use crate::db::queries::identifier_mappings as mapping_queries;
use crate::error::IngestError;
use openfigi::OpenFigiClient;

pub const RESOLUTION_SOURCE_OPENFIGI: &str = "openfigi";
pub const RESOLUTION_SOURCE_HEURISTIC: &str = "heuristic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    OpenFigi,
    Heuristic,
    /// Opaque placeholder derived from the cusip prefix; explicitly not a
    /// real ticker and never written back to the persistent cache.
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub ticker: String,
    pub source: ResolutionSource,
    pub confidence: f64,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self.source, ResolutionSource::Placeholder)
    }
}

/// Persistent mapping store behind one dispatch point.
enum MappingCache {
    Postgres(PgPool),
    #[cfg(test)]
    Memory(Arc<DashMap<String, IdentifierMappingModel>>),
}

impl MappingCache {
    async fn get(&self, cusip: &str) -> Result<Option<IdentifierMappingModel>, sqlx::Error> {
        match self {
            MappingCache::Postgres(pool) => mapping_queries::get_mapping(pool, cusip).await,
            #[cfg(test)]
            MappingCache::Memory(map) => Ok(map.get(cusip).map(|m| m.value().clone())),
        }
    }

    async fn put(
        &self,
        cusip: &str,
        ticker: &str,
        source: &str,
        confidence: f64,
    ) -> Result<(), sqlx::Error> {
        match self {
            MappingCache::Postgres(pool) => {
                mapping_queries::upsert_mapping(pool, cusip, ticker, source, confidence).await
            }
            #[cfg(test)]
            MappingCache::Memory(map) => {
                map.insert(
                    cusip.to_string(),
                    IdentifierMappingModel {
                        cusip: cusip.to_string(),
                        ticker: ticker.to_string(),
                        source: source.to_string(),
                        confidence,
                        resolved_at: chrono::Utc::now(),
                    },
                );
                Ok(())
            }
        }
    }
}

/// External mapping lookup behind one dispatch point.
enum FigiLookup {
    Client(OpenFigiClient),
    #[cfg(test)]
    Static(StaticLookup),
}

/// Canned lookup for exercising the resolution chain and single-flight.
#[cfg(test)]
struct StaticLookup {
    ticker: Option<String>,
    calls: Arc<std::sync::atomic::AtomicUsize>,
}

impl FigiLookup {
    async fn lookup(&self, cusip: &str) -> Result<Option<String>, IngestError> {
        match self {
            FigiLookup::Client(client) => client.lookup_cusip(cusip).await,
            #[cfg(test)]
            FigiLookup::Static(s) => {
                s.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                // Yield long enough for concurrent callers to overlap.
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok(s.ticker.clone())
            }
        }
    }
}

/// Resolves CUSIPs to tickers through an ordered strategy chain, first
/// success wins: persistent cache, OpenFIGI (one rate-limited attempt per
/// cusip per run), curated name heuristic, then a flagged placeholder.
///
/// Shared across concurrent runs; the single-flight map collapses concurrent
/// resolutions of the same cusip into one underlying chain execution.
pub struct IdentifierResolver {
    cache: MappingCache,
    figi: FigiLookup,
    inflight: DashMap<String, Arc<OnceCell<Resolution>>>,
}

impl IdentifierResolver {
    pub fn new(pool: PgPool, figi: OpenFigiClient) -> Self {
        Self {
            cache: MappingCache::Postgres(pool),
            figi: FigiLookup::Client(figi),
            inflight: DashMap::new(),
        }
    }

    #[cfg(test)]
    fn with_backends(cache: MappingCache, figi: FigiLookup) -> Self {
        Self {
            cache,
            figi,
            inflight: DashMap::new(),
        }
    }

    /// Drop per-run memoization so the next batch re-consults the chain.
    pub fn clear_run_cache(&self) {
        self.inflight.clear();
    }

    #[instrument(skip(self, company_name_hint))]
    pub async fn resolve(&self, cusip: &str, company_name_hint: Option<&str>) -> Resolution {
        let cell = self
            .inflight
            .entry(cusip.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_init(|| self.resolve_uncached(cusip, company_name_hint))
            .await
            .clone()
    }

    async fn resolve_uncached(&self, cusip: &str, company_name_hint: Option<&str>) -> Resolution {
        // 1. Persistent cache exact match
        match self.cache.get(cusip).await {
            Ok(Some(mapping)) => {
                debug!(cusip, ticker = %mapping.ticker, "Resolved from persistent cache");
                return Resolution {
                    ticker: mapping.ticker,
                    source: ResolutionSource::Cache,
                    confidence: mapping.confidence,
                };
            }
            Ok(None) => {}
            Err(e) => warn!(cusip, error = %e, "Identifier cache lookup failed, continuing chain"),
        }

        // 2. External mapping lookup, one bounded-timeout attempt
        match self.figi.lookup(cusip).await {
            Ok(Some(ticker)) => {
                let resolution = Resolution {
                    ticker,
                    source: ResolutionSource::OpenFigi,
                    confidence: 0.99,
                };
                self.cache_resolution(cusip, &resolution, RESOLUTION_SOURCE_OPENFIGI)
                    .await;
                return resolution;
            }
            Ok(None) => debug!(cusip, "OpenFIGI has no mapping"),
            Err(e) => warn!(cusip, error = %e, "OpenFIGI lookup failed, continuing chain"),
        }

        // 3. Deterministic name heuristic
        if let Some(ticker) = company_name_hint.and_then(aliases::lookup) {
            let resolution = Resolution {
                ticker: ticker.to_string(),
                source: ResolutionSource::Heuristic,
                confidence: 0.8,
            };
            self.cache_resolution(cusip, &resolution, RESOLUTION_SOURCE_HEURISTIC)
                .await;
            return resolution;
        }

        // 4. Flagged placeholder; never cached so a later run can correct it
        debug!(cusip, "Unresolved, using placeholder ticker");
        Resolution {
            ticker: placeholder_for(cusip),
            source: ResolutionSource::Placeholder,
            confidence: 0.0,
        }
    }

    async fn cache_resolution(&self, cusip: &str, resolution: &Resolution, source: &str) {
        if let Err(e) = self
            .cache
            .put(cusip, &resolution.ticker, source, resolution.confidence)
            .await
        {
            warn!(cusip, error = %e, "Failed to write identifier mapping cache");
        }
    }
}

/// Opaque stand-in ticker for an unresolved cusip, derived from the issuer
/// prefix so repeated runs produce a stable key.
pub fn placeholder_for(cusip: &str) -> String {
    let prefix: String = cusip.chars().take(6).collect();
    format!("U:{prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seeded_map(entries: &[(&str, &str)]) -> Arc<DashMap<String, IdentifierMappingModel>> {
        let map = DashMap::new();
        for (cusip, ticker) in entries {
            map.insert(
                cusip.to_string(),
                IdentifierMappingModel {
                    cusip: cusip.to_string(),
                    ticker: ticker.to_string(),
                    source: RESOLUTION_SOURCE_OPENFIGI.to_string(),
                    confidence: 0.99,
                    resolved_at: chrono::Utc::now(),
                },
            );
        }
        Arc::new(map)
    }

    fn resolver_with(
        map: Arc<DashMap<String, IdentifierMappingModel>>,
        figi_ticker: Option<&str>,
    ) -> (IdentifierResolver, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let figi = FigiLookup::Static(StaticLookup {
            ticker: figi_ticker.map(str::to_string),
            calls: calls.clone(),
        });
        let resolver = IdentifierResolver::with_backends(MappingCache::Memory(map), figi);
        (resolver, calls)
    }

    #[tokio::test]
    async fn cached_cusip_resolves_without_external_calls() {
        let (resolver, calls) = resolver_with(seeded_map(&[("037833100", "AAPL")]), Some("WRONG"));
        let resolution = resolver.resolve("037833100", Some("APPLE INC")).await;
        assert_eq!(resolution.ticker, "AAPL");
        assert_eq!(resolution.source, ResolutionSource::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_same_cusip_resolutions_share_one_lookup() {
        let (resolver, calls) = resolver_with(seeded_map(&[]), Some("KHC"));
        let (a, b, c) = tokio::join!(
            resolver.resolve("500754106", None),
            resolver.resolve("500754106", None),
            resolver.resolve("500754106", None),
        );
        for resolution in [a, b, c] {
            assert_eq!(resolution.ticker, "KHC");
            assert_eq!(resolution.source, ResolutionSource::OpenFigi);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn heuristic_resolution_is_written_back_to_cache() {
        let map = seeded_map(&[]);
        let (resolver, calls) = resolver_with(map.clone(), None);
        let resolution = resolver.resolve("500754106", Some("KRAFT HEINZ CO")).await;
        assert_eq!(resolution.ticker, "KHC");
        assert_eq!(resolution.source, ResolutionSource::Heuristic);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let cached = map.get("500754106").unwrap();
        assert_eq!(cached.ticker, "KHC");
        assert_eq!(cached.source, RESOLUTION_SOURCE_HEURISTIC);
    }

    #[tokio::test]
    async fn placeholder_is_never_written_to_cache() {
        let map = seeded_map(&[]);
        let (resolver, _) = resolver_with(map.clone(), None);
        let resolution = resolver.resolve("999999999", None).await;
        assert!(!resolution.is_resolved());
        assert_eq!(resolution.ticker, "U:999999");
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn placeholder_is_memoized_until_run_cache_cleared() {
        let (resolver, calls) = resolver_with(seeded_map(&[]), None);
        let first = resolver.resolve("999999999", None).await;
        assert!(!first.is_resolved());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Same run: memoized, no second external attempt.
        resolver.resolve("999999999", None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Next run re-consults the chain so the placeholder can be corrected.
        resolver.clear_run_cache();
        resolver.resolve("999999999", None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn placeholder_uses_cusip_prefix() {
        assert_eq!(placeholder_for("037833100"), "U:037833");
        assert_eq!(placeholder_for("ABC"), "U:ABC");
    }

    #[test]
    fn placeholder_is_marked_unresolved() {
        let r = Resolution {
            ticker: placeholder_for("037833100"),
            source: ResolutionSource::Placeholder,
            confidence: 0.0,
        };
        assert!(!r.is_resolved());
    }
}
