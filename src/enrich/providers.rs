use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::IngestError;
use crate::sources::http::FeedClient;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub low: Decimal,
    pub high: Decimal,
}

/// Ordered price providers behind one dispatch point. The enricher walks
/// them in order and takes the first range any of them produces.
pub enum PriceProvider {
    Polygon(PolygonProvider),
    Stooq(StooqProvider),
    #[cfg(test)]
    Static(StaticProvider),
}

impl PriceProvider {
    pub fn name(&self) -> &'static str {
        match self {
            PriceProvider::Polygon(_) => "polygon",
            PriceProvider::Stooq(_) => "stooq",
            #[cfg(test)]
            PriceProvider::Static(_) => "static",
        }
    }

    pub async fn window_range(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<PriceRange>, IngestError> {
        match self {
            PriceProvider::Polygon(p) => p.window_range(ticker, from, to).await,
            PriceProvider::Stooq(p) => p.window_range(ticker, from, to).await,
            #[cfg(test)]
            PriceProvider::Static(p) => {
                p.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(p.range)
            }
        }
    }
}

/// Canned provider for exercising the enricher's cache and chain logic.
#[cfg(test)]
pub struct StaticProvider {
    pub range: Option<PriceRange>,
    pub calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[derive(Debug, Deserialize)]
struct PolygonAggsResponse {
    #[serde(default)]
    results: Vec<PolygonAgg>,
}

#[derive(Debug, Deserialize)]
struct PolygonAgg {
    l: f64,
    h: f64,
}

/// Key-gated primary provider. Skips itself cleanly when no key is
/// configured so the chain falls through to the keyless fallback.
pub struct PolygonProvider {
    client: FeedClient,
    api_key: Option<String>,
}

impl PolygonProvider {
    pub fn new(client: FeedClient, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    #[instrument(skip(self))]
    async fn window_range(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<PriceRange>, IngestError> {
        let Some(api_key) = &self.api_key else {
            debug!("No Polygon API key configured, skipping provider");
            return Ok(None);
        };
        let url = format!(
            "https://api.polygon.io/v2/aggs/ticker/{ticker}/range/1/day/{from}/{to}?adjusted=true&sort=asc&limit=5000&apiKey={api_key}"
        );
        let response: PolygonAggsResponse = self.client.get_json(&url).await?;
        Ok(range_from_bars(
            response
                .results
                .iter()
                .filter_map(|bar| Some((Decimal::from_f64(bar.l)?, Decimal::from_f64(bar.h)?))),
        ))
    }
}

/// Keyless fallback provider: Stooq serves daily OHLCV as CSV.
pub struct StooqProvider {
    client: FeedClient,
}

impl StooqProvider {
    pub fn new(client: FeedClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self))]
    async fn window_range(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<PriceRange>, IngestError> {
        let url = format!(
            "https://stooq.com/q/d/l/?s={}.us&d1={}&d2={}&i=d",
            ticker.to_lowercase(),
            from.format("%Y%m%d"),
            to.format("%Y%m%d"),
        );
        let body = self.client.get_text(&url).await?;
        Ok(parse_stooq_csv(&body))
    }
}

fn parse_stooq_csv(body: &str) -> Option<PriceRange> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader.headers().ok()?.clone();
    let low_col = headers.iter().position(|h| h.eq_ignore_ascii_case("low"))?;
    let high_col = headers.iter().position(|h| h.eq_ignore_ascii_case("high"))?;

    let bars = reader.records().filter_map(|record| {
        let record = record.ok()?;
        let low: Decimal = record.get(low_col)?.trim().parse().ok()?;
        let high: Decimal = record.get(high_col)?.trim().parse().ok()?;
        Some((low, high))
    });
    range_from_bars(bars)
}

fn range_from_bars(bars: impl Iterator<Item = (Decimal, Decimal)>) -> Option<PriceRange> {
    let mut range: Option<PriceRange> = None;
    for (low, high) in bars {
        range = Some(match range {
            None => PriceRange { low, high },
            Some(r) => PriceRange {
                low: r.low.min(low),
                high: r.high.max(high),
            },
        });
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stooq_csv_window_range() {
        let body = "Date,Open,High,Low,Close,Volume\n\
                    2024-03-11,170.0,174.5,169.2,173.0,1000\n\
                    2024-03-12,173.0,176.1,171.8,175.5,1200\n\
                    2024-03-13,175.5,175.9,168.4,169.0,900\n";
        let range = parse_stooq_csv(body).unwrap();
        assert_eq!(range.low, dec!(168.4));
        assert_eq!(range.high, dec!(176.1));
    }

    #[test]
    fn stooq_no_data_yields_none() {
        assert!(parse_stooq_csv("No data").is_none());
        assert!(parse_stooq_csv("").is_none());
    }

    #[test]
    fn range_accumulates_across_bars() {
        let bars = vec![
            (dec!(10), dec!(12)),
            (dec!(9), dec!(11)),
            (dec!(10.5), dec!(13)),
        ];
        let range = range_from_bars(bars.into_iter()).unwrap();
        assert_eq!(range.low, dec!(9));
        assert_eq!(range.high, dec!(13));
    }
}
