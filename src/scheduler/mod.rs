use chrono::Duration as ChronoDuration;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::db::models::investors::{DisclosureSourceModel, InvestorModel};
use crate::db::models::snapshots::{HoldingRecordModel, NewHoldingRecordModel};
use crate::db::queries::investors as investor_queries;
use crate::db::snapshot_store::{SnapshotOutcome, SnapshotStore};
use crate::diff::{KeyPolicy, Position, compute_diff};
use crate::enrich::PriceContextEnricher;
use crate::error::IngestError;
use crate::events::ChangeEventEmitter;
use crate::resolver::IdentifierResolver;
use crate::resolver::openfigi::OpenFigiClient;
use crate::sources::http::HttpClients;
use crate::sources::{NormalizedHolding, SourceAdapter};

/// Per-run ingestion states. `SkippedDuplicate`, `Notified` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Fetched,
    Parsed,
    SkippedDuplicate,
    Stored,
    Diffed,
    Enriched,
    Notified,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "PENDING",
            RunState::Fetched => "FETCHED",
            RunState::Parsed => "PARSED",
            RunState::SkippedDuplicate => "SKIPPED_DUPLICATE",
            RunState::Stored => "STORED",
            RunState::Diffed => "DIFFED",
            RunState::Enriched => "ENRICHED",
            RunState::Notified => "NOTIFIED",
            RunState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub investor_id: i32,
    pub source_id: i32,
    pub state: RunState,
    pub change_count: usize,
    pub error: Option<String>,
}

/// Orchestrates per-investor ingestion runs: cadence batches and on-demand
/// single-investor runs. Runs for distinct investors execute concurrently in
/// a bounded pool; each run is independently retried, timed out and
/// isolated so one investor's failure never aborts the batch.
pub struct IngestionScheduler {
    pool: PgPool,
    clients: Arc<HttpClients>,
    resolver: Arc<IdentifierResolver>,
    enricher: Arc<PriceContextEnricher>,
    emitter: ChangeEventEmitter,
    store: SnapshotStore,
    max_concurrent_runs: usize,
    max_fetch_retries: u32,
    run_timeout: Duration,
}

impl IngestionScheduler {
    pub async fn init(config: &Config, pool: PgPool) -> eyre::Result<Self> {
        let clients = Arc::new(HttpClients::new(config));
        let resolver = Arc::new(IdentifierResolver::new(
            pool.clone(),
            OpenFigiClient::new(clients.openfigi.clone()),
        ));
        let enricher = Arc::new(PriceContextEnricher::new(&clients, config));
        let emitter = ChangeEventEmitter::connect(pool.clone(), &config.redis_url).await?;
        let store = SnapshotStore::new(pool.clone());
        Ok(Self {
            pool,
            clients,
            resolver,
            enricher,
            emitter,
            store,
            max_concurrent_runs: config.max_concurrent_runs,
            max_fetch_retries: config.max_fetch_retries,
            run_timeout: Duration::from_secs(config.run_timeout_secs),
        })
    }

    /// One cadence pass over every configured (investor, source) pair.
    #[instrument(skip(self))]
    pub async fn run_batch(&self) -> eyre::Result<Vec<RunReport>> {
        let investors = investor_queries::list_investors(&self.pool).await?;
        let mut tasks: Vec<(InvestorModel, DisclosureSourceModel)> = Vec::new();
        for investor in investors {
            let sources =
                investor_queries::list_sources_for_investor(&self.pool, investor.id).await?;
            for source in sources {
                tasks.push((investor.clone(), source));
            }
        }
        info!(run_count = tasks.len(), "Starting ingestion batch");

        let reports: Vec<RunReport> = stream::iter(tasks)
            .map(|(investor, source)| self.run_guarded(investor, source))
            .buffer_unordered(self.max_concurrent_runs)
            .collect()
            .await;

        // Per-run memoization must not leak into the next batch.
        self.resolver.clear_run_cache();

        let failed = reports.iter().filter(|r| r.state == RunState::Failed).count();
        let notified = reports.iter().filter(|r| r.state == RunState::Notified).count();
        let skipped = reports
            .iter()
            .filter(|r| r.state == RunState::SkippedDuplicate)
            .count();
        info!(total = reports.len(), notified, skipped, failed, "Ingestion batch finished");
        Ok(reports)
    }

    /// On-demand run for a single investor, across all of its sources.
    #[instrument(skip(self))]
    pub async fn run_investor(&self, investor_id: i32) -> eyre::Result<Vec<RunReport>> {
        let investor = investor_queries::get_investor(&self.pool, investor_id)
            .await?
            .ok_or_else(|| eyre::eyre!("investor {investor_id} not found"))?;
        let sources = investor_queries::list_sources_for_investor(&self.pool, investor_id).await?;
        if sources.is_empty() {
            eyre::bail!("investor {investor_id} has no disclosure sources configured");
        }

        let mut reports = Vec::new();
        for source in sources {
            reports.push(self.run_guarded(investor.clone(), source).await);
        }
        // A later on-demand run must be able to correct placeholder outcomes.
        self.resolver.clear_run_cache();
        Ok(reports)
    }

    /// Wraps one run with its overall timeout and transient-retry loop.
    /// Exceeding the timeout cancels only this run.
    async fn run_guarded(
        &self,
        investor: InvestorModel,
        source: DisclosureSourceModel,
    ) -> RunReport {
        let investor_id = investor.id;
        let source_id = source.id;
        match tokio::time::timeout(self.run_timeout, self.run_with_retry(&investor, &source)).await
        {
            Ok(Ok((state, change_count))) => RunReport {
                investor_id,
                source_id,
                state,
                change_count,
                error: None,
            },
            Ok(Err(e)) => {
                error!(investor_id, source_id, error = %e, "Ingestion run failed");
                RunReport {
                    investor_id,
                    source_id,
                    state: RunState::Failed,
                    change_count: 0,
                    error: Some(e.to_string()),
                }
            }
            Err(_) => {
                error!(investor_id, source_id, timeout = ?self.run_timeout, "Ingestion run timed out");
                RunReport {
                    investor_id,
                    source_id,
                    state: RunState::Failed,
                    change_count: 0,
                    error: Some("run timeout exceeded".to_string()),
                }
            }
        }
    }

    async fn run_with_retry(
        &self,
        investor: &InvestorModel,
        source: &DisclosureSourceModel,
    ) -> Result<(RunState, usize), IngestError> {
        retry_transient(self.max_fetch_retries, move || {
            self.run_once(investor, source)
        })
        .await
    }

    /// One pass of the run state machine:
    /// PENDING -> FETCHED -> PARSED -> (SKIPPED_DUPLICATE | STORED)
    ///   -> [DIFFED if baseline exists] -> ENRICHED -> NOTIFIED
    #[instrument(skip(self, investor, source), fields(investor_id = investor.id, source_id = source.id, source_type = %source.source_type))]
    async fn run_once(
        &self,
        investor: &InvestorModel,
        source: &DisclosureSourceModel,
    ) -> Result<(RunState, usize), IngestError> {
        let adapter = SourceAdapter::for_source(source, &self.clients)?;

        let parsed = match adapter.fetch_and_parse().await {
            Ok(parsed) => parsed,
            Err(IngestError::PermanentFetch(msg)) => {
                // Dead feed or missing document: this investor's run ends
                // with zero holdings; the batch keeps going.
                warn!(investor_id = investor.id, %msg, "Source permanently unavailable, ending run empty");
                investor_queries::touch_last_data_fetch(&self.pool, investor.id).await?;
                return Ok((RunState::Failed, 0));
            }
            Err(e) => return Err(e),
        };
        debug!(
            holdings = parsed.holdings.len(),
            skipped_rows = parsed.skipped_rows,
            state = %RunState::Parsed,
            "Disclosure fetched and parsed"
        );

        let effective_date =
            parsed.snapshot_date - ChronoDuration::days(source.reporting_delay_days as i64);
        let key_policy = adapter.key_policy();

        // Baseline must be read before the new snapshot lands.
        let baseline = self.store.latest_snapshot(investor.id).await?;

        let records = self.to_records(&parsed.holdings).await;
        let outcome = self
            .store
            .create_snapshot(
                investor.id,
                effective_date,
                adapter.source_label(),
                parsed.filing_date,
                parsed.period_end_date,
                &records,
            )
            .await?;
        if outcome == SnapshotOutcome::SkippedDuplicate {
            investor_queries::touch_last_data_fetch(&self.pool, investor.id).await?;
            return Ok((RunState::SkippedDuplicate, 0));
        }

        let (mut changes, from_date) = match &baseline {
            Some((snapshot, old_records)) if snapshot.snapshot_date < effective_date => {
                let old = position_map_from_records(old_records, key_policy);
                let new = position_map_from_new_records(&records, key_policy);
                let changes = compute_diff(&old, &new);
                debug!(changes = changes.len(), state = %RunState::Diffed, "Diff computed");
                (changes, Some(snapshot.snapshot_date))
            }
            _ => {
                debug!("No usable baseline snapshot, skipping diff for first ingestion");
                (Vec::new(), None)
            }
        };

        if let Some(from) = from_date {
            self.enricher
                .enrich(&mut changes, from, effective_date)
                .await;
            debug!(state = %RunState::Enriched, "Price context enrichment finished");
        }

        self.emitter
            .emit(investor.id, from_date, effective_date, &changes)
            .await?;
        Ok((RunState::Notified, changes.len()))
    }

    /// Turn normalized holdings into storable records, resolving tickers for
    /// regulatory entries that only carry a CUSIP.
    async fn to_records(&self, holdings: &[NormalizedHolding]) -> Vec<NewHoldingRecordModel> {
        let mut records = Vec::with_capacity(holdings.len());
        for holding in holdings {
            let ticker = match (&holding.ticker, &holding.cusip) {
                (Some(ticker), _) => ticker.clone(),
                (None, Some(cusip)) => {
                    let resolution = self
                        .resolver
                        .resolve(cusip, holding.company_name.as_deref())
                        .await;
                    if !resolution.is_resolved() {
                        debug!(cusip, placeholder = %resolution.ticker, "Holding kept with unresolved placeholder ticker");
                    }
                    resolution.ticker
                }
                (None, None) => {
                    warn!("Holding without ticker or cusip, dropping");
                    continue;
                }
            };
            records.push(NewHoldingRecordModel {
                ticker,
                cusip: holding.cusip.clone(),
                company_name: holding.company_name.clone(),
                shares: holding.shares,
                market_value: holding.market_value,
                weight_percent: holding.weight_percent,
            });
        }
        records
    }
}

/// Runs `op`, retrying transient failures with linearly growing delays.
/// `max_retries` counts retries beyond the initial attempt, so a budget of
/// zero still performs exactly one attempt.
async fn retry_transient<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, IngestError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                let delay_ms = attempt as u64 * 500; // Linear backoff: 500ms, 1000ms
                warn!(attempt, delay_ms, error = %e, "Transient ingestion failure, retrying after delay");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn position_map_from_records(
    records: &[HoldingRecordModel],
    policy: KeyPolicy,
) -> BTreeMap<String, Position> {
    collect_positions(
        records
            .iter()
            .map(|r| (r.ticker.as_str(), r.cusip.as_deref(), r.shares, r.weight_percent, r.market_value)),
        policy,
    )
}

fn position_map_from_new_records(
    records: &[NewHoldingRecordModel],
    policy: KeyPolicy,
) -> BTreeMap<String, Position> {
    collect_positions(
        records
            .iter()
            .map(|r| (r.ticker.as_str(), r.cusip.as_deref(), r.shares, r.weight_percent, r.market_value)),
        policy,
    )
}

/// Rows that land on the same key (e.g. one security under two tickers in a
/// cusip-keyed filing) are combined into a single position.
fn collect_positions<'a>(
    rows: impl Iterator<Item = (&'a str, Option<&'a str>, Decimal, Option<Decimal>, Option<Decimal>)>,
    policy: KeyPolicy,
) -> BTreeMap<String, Position> {
    let mut positions: BTreeMap<String, Position> = BTreeMap::new();
    for (ticker, cusip, shares, weight, value) in rows {
        let key = policy.key_for(ticker, cusip);
        positions
            .entry(key)
            .and_modify(|p| {
                p.shares += shares;
                p.weight_percent = add_opt(p.weight_percent, weight);
                p.market_value = add_opt(p.market_value, value);
            })
            .or_insert(Position {
                ticker: ticker.to_string(),
                shares,
                weight_percent: weight,
                market_value: value,
            });
    }
    positions
}

fn add_opt(a: Option<Decimal>, b: Option<Decimal>) -> Option<Decimal> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    }
}
