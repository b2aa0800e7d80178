use chrono::{NaiveDate, Utc};
use csv::StringRecord;
use tracing::{debug, instrument, warn};

use super::http::FeedClient;
use super::{NormalizedHolding, ParsedDisclosure, parse_date_loose, parse_decimal_loose};
use crate::error::IngestError;

// Ordered accepted header variants per logical column. Issuers disagree on
// almost every name; the first variant that matches a header wins.
const TICKER_HEADERS: &[&str] = &["ticker", "symbol", "stock ticker", "holding ticker"];
const COMPANY_HEADERS: &[&str] = &[
    "company",
    "name",
    "company name",
    "security name",
    "security description",
    "holding name",
];
const CUSIP_HEADERS: &[&str] = &["cusip", "cusip number"];
const SHARES_HEADERS: &[&str] = &["shares", "shares held", "quantity", "share quantity", "balance"];
const VALUE_HEADERS: &[&str] = &[
    "market value",
    "market value ($)",
    "market value usd",
    "value",
    "notional value",
];
const WEIGHT_HEADERS: &[&str] = &[
    "weight",
    "weight (%)",
    "weight %",
    "weightings",
    "% of net assets",
    "portfolio weight",
];
const DATE_HEADERS: &[&str] = &["date", "as of", "as of date", "trade date", "holding date"];

#[derive(Debug, Default)]
struct ColumnMap {
    ticker: Option<usize>,
    company: Option<usize>,
    cusip: Option<usize>,
    shares: Option<usize>,
    market_value: Option<usize>,
    weight: Option<usize>,
    date: Option<usize>,
}

pub struct EtfCsvAdapter {
    url: String,
    client: FeedClient,
}

impl EtfCsvAdapter {
    pub fn new(url: String, client: FeedClient) -> Self {
        Self { url, client }
    }

    pub async fn fetch_raw(&self) -> Result<String, IngestError> {
        let body = self.client.get_text(&self.url).await?;
        if body.trim().is_empty() {
            return Err(IngestError::PermanentFetch(format!(
                "empty holdings feed at {}",
                self.url
            )));
        }
        Ok(body)
    }

    #[instrument(skip(self))]
    pub async fn fetch_and_parse(&self) -> Result<ParsedDisclosure, IngestError> {
        let raw = self.fetch_raw().await?;
        self.parse(&raw)
    }

    pub fn parse(&self, raw: &str) -> Result<ParsedDisclosure, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(raw.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| IngestError::Parse(format!("unreadable header row: {e}")))?
            .clone();
        let columns = locate_columns(&headers);
        let (Some(ticker_col), Some(shares_col)) = (columns.ticker, columns.shares) else {
            return Err(IngestError::Parse(format!(
                "no recognizable ticker/shares columns in header row: {headers:?}"
            )));
        };

        let mut holdings = Vec::new();
        let mut skipped_rows = 0usize;
        let mut row_count = 0usize;
        let mut snapshot_date: Option<NaiveDate> = None;

        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, "Skipping malformed CSV row");
                    skipped_rows += 1;
                    continue;
                }
            };
            row_count += 1;

            // Snapshot date comes from the first data row's date column only;
            // a corrupt cell there means fall back to today, not to a later row.
            if row_count == 1 {
                snapshot_date = columns
                    .date
                    .and_then(|i| record.get(i))
                    .and_then(parse_date_loose);
            }

            let ticker = record
                .get(ticker_col)
                .map(str::trim)
                .filter(|t| !t.is_empty());
            let shares = record.get(shares_col).and_then(parse_decimal_loose);
            let (Some(ticker), Some(shares)) = (ticker, shares) else {
                skipped_rows += 1;
                continue;
            };

            holdings.push(NormalizedHolding {
                ticker: Some(ticker.to_uppercase()),
                company_name: columns
                    .company
                    .and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                cusip: columns
                    .cusip
                    .and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                shares,
                market_value: columns
                    .market_value
                    .and_then(|i| record.get(i))
                    .and_then(parse_decimal_loose),
                weight_percent: columns
                    .weight
                    .and_then(|i| record.get(i))
                    .and_then(parse_decimal_loose),
            });
        }

        if row_count == 0 {
            return Err(IngestError::PermanentFetch(format!(
                "holdings feed at {} has a header but no data rows",
                self.url
            )));
        }
        if holdings.is_empty() {
            return Err(IngestError::Parse(format!(
                "no row of {row_count} parsed from feed at {}",
                self.url
            )));
        }
        if skipped_rows > 0 {
            warn!(skipped_rows, parsed = holdings.len(), url = %self.url, "Skipped unparsable feed rows");
        }

        Ok(ParsedDisclosure {
            snapshot_date: snapshot_date.unwrap_or_else(|| Utc::now().date_naive()),
            filing_date: None,
            period_end_date: None,
            holdings,
            skipped_rows,
        })
    }
}

fn locate_columns(headers: &StringRecord) -> ColumnMap {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
        .collect();
    let find = |variants: &[&str]| {
        variants
            .iter()
            .find_map(|v| normalized.iter().position(|h| h == v))
    };
    ColumnMap {
        ticker: find(TICKER_HEADERS),
        company: find(COMPANY_HEADERS),
        cusip: find(CUSIP_HEADERS),
        shares: find(SHARES_HEADERS),
        market_value: find(VALUE_HEADERS),
        weight: find(WEIGHT_HEADERS),
        date: find(DATE_HEADERS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> EtfCsvAdapter {
        let config = crate::config::Config {
            database_url: String::new(),
            redis_url: String::new(),
            sec_user_agent: "test".into(),
            openfigi_api_key: None,
            polygon_api_key: None,
            max_concurrent_runs: 1,
            max_fetch_retries: 0,
            run_timeout_secs: 1,
            ingest_interval_secs: 1,
            price_cache_ttl_secs: 1,
        };
        let clients = crate::sources::http::HttpClients::new(&config);
        EtfCsvAdapter::new("http://example.com/holdings.csv".into(), clients.etf)
    }

    const STANDARD_FEED: &str = "\
date,ticker,company,cusip,shares,market value ($),weight (%)
03/15/2024,AAPL,Apple Inc,037833100,\"1,200\",$210000.00,6.0%
03/15/2024,NVDA,NVIDIA Corp,67066G104,300,$264000.00,2.0%
";

    const VARIANT_FEED: &str = "\
as of,symbol,security name,quantity,value,% of net assets
2024-03-15,MSFT,Microsoft Corporation,500,208000,5.5
2024-03-15,,missing ticker row,100,1000,0.1
";

    #[test]
    fn parses_standard_feed() {
        let parsed = adapter().parse(STANDARD_FEED).unwrap();
        assert_eq!(parsed.snapshot_date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(parsed.holdings.len(), 2);
        assert_eq!(parsed.skipped_rows, 0);

        let aapl = &parsed.holdings[0];
        assert_eq!(aapl.ticker.as_deref(), Some("AAPL"));
        assert_eq!(aapl.cusip.as_deref(), Some("037833100"));
        assert_eq!(aapl.shares, dec!(1200));
        assert_eq!(aapl.market_value, Some(dec!(210000.00)));
        assert_eq!(aapl.weight_percent, Some(dec!(6.0)));
    }

    #[test]
    fn matches_variant_headers_and_skips_bad_rows() {
        let parsed = adapter().parse(VARIANT_FEED).unwrap();
        assert_eq!(parsed.holdings.len(), 1);
        assert_eq!(parsed.skipped_rows, 1);
        let msft = &parsed.holdings[0];
        assert_eq!(msft.ticker.as_deref(), Some("MSFT"));
        assert_eq!(msft.shares, dec!(500));
        assert_eq!(msft.weight_percent, Some(dec!(5.5)));
    }

    #[test]
    fn unparsable_date_falls_back_to_today() {
        let feed = "ticker,shares,date\nAAPL,100,soon\n";
        let parsed = adapter().parse(feed).unwrap();
        assert_eq!(parsed.snapshot_date, Utc::now().date_naive());
    }

    #[test]
    fn corrupt_first_row_date_never_adopts_a_later_rows_date() {
        let feed = "date,ticker,shares\nbogus,AAPL,100\n03/15/2024,MSFT,200\n";
        let parsed = adapter().parse(feed).unwrap();
        assert_eq!(parsed.holdings.len(), 2);
        assert_eq!(parsed.snapshot_date, Utc::now().date_naive());
    }

    #[test]
    fn unrecognizable_headers_are_a_parse_error() {
        let feed = "alpha,beta,gamma\n1,2,3\n";
        match adapter().parse(feed) {
            Err(IngestError::Parse(_)) => {}
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn all_rows_bad_is_a_parse_error() {
        let feed = "ticker,shares\n,not-a-number\n,also-bad\n";
        match adapter().parse(feed) {
            Err(IngestError::Parse(_)) => {}
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn header_only_feed_is_permanent_failure() {
        let feed = "ticker,shares\n";
        match adapter().parse(feed) {
            Err(IngestError::PermanentFetch(_)) => {}
            other => panic!("expected permanent failure, got {other:?}"),
        }
    }
}
