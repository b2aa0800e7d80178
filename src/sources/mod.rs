pub mod etf_csv;
pub mod http;
pub mod sec_13f;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::db::models::investors::DisclosureSourceModel;
use crate::diff::KeyPolicy;
use crate::error::IngestError;
use etf_csv::EtfCsvAdapter;
use http::HttpClients;
use sec_13f::Sec13fAdapter;

pub const SOURCE_TYPE_ETF_HOLDINGS: &str = "ETF_HOLDINGS";
pub const SOURCE_TYPE_SEC_13F: &str = "SEC_13F";

/// One security position as reported by a disclosure source, reduced to the
/// single shape the rest of the pipeline consumes regardless of origin.
#[derive(Debug, Clone)]
pub struct NormalizedHolding {
    pub ticker: Option<String>,
    pub company_name: Option<String>,
    pub cusip: Option<String>,
    pub shares: Decimal,
    pub market_value: Option<Decimal>,
    pub weight_percent: Option<Decimal>,
}

#[derive(Debug)]
pub struct ParsedDisclosure {
    /// Point-in-time date of the disclosed portfolio.
    pub snapshot_date: NaiveDate,
    pub filing_date: Option<NaiveDate>,
    pub period_end_date: Option<NaiveDate>,
    pub holdings: Vec<NormalizedHolding>,
    pub skipped_rows: usize,
}

/// Source adapters behind one dispatch point so the scheduler is agnostic to
/// where a disclosure came from.
pub enum SourceAdapter {
    EtfCsv(EtfCsvAdapter),
    Sec13f(Sec13fAdapter),
}

impl SourceAdapter {
    /// Build the adapter for a configured disclosure source. Missing required
    /// configuration is the one condition that fails the investor's run up
    /// front, before anything is fetched.
    pub fn for_source(
        source: &DisclosureSourceModel,
        clients: &HttpClients,
    ) -> Result<Self, IngestError> {
        let config = source
            .source_config
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match source.source_type.as_str() {
            SOURCE_TYPE_ETF_HOLDINGS => {
                let url = config.ok_or_else(|| {
                    IngestError::MissingConfig(format!("source {} has no feed URL", source.id))
                })?;
                Ok(SourceAdapter::EtfCsv(EtfCsvAdapter::new(
                    url.to_string(),
                    clients.etf.clone(),
                )))
            }
            SOURCE_TYPE_SEC_13F => {
                let cik = config.ok_or_else(|| {
                    IngestError::MissingConfig(format!("source {} has no filer CIK", source.id))
                })?;
                Ok(SourceAdapter::Sec13f(Sec13fAdapter::new(
                    cik.to_string(),
                    clients.edgar.clone(),
                )))
            }
            other => Err(IngestError::MissingConfig(format!(
                "source {} has unknown type {other}",
                source.id
            ))),
        }
    }

    pub async fn fetch_and_parse(&self) -> Result<ParsedDisclosure, IngestError> {
        match self {
            SourceAdapter::EtfCsv(adapter) => adapter.fetch_and_parse().await,
            SourceAdapter::Sec13f(adapter) => adapter.fetch_and_parse().await,
        }
    }

    pub fn key_policy(&self) -> KeyPolicy {
        match self {
            SourceAdapter::EtfCsv(_) => KeyPolicy::TickerOnly,
            SourceAdapter::Sec13f(_) => KeyPolicy::CusipPreferred,
        }
    }

    pub fn source_label(&self) -> &'static str {
        match self {
            SourceAdapter::EtfCsv(_) => SOURCE_TYPE_ETF_HOLDINGS,
            SourceAdapter::Sec13f(_) => SOURCE_TYPE_SEC_13F,
        }
    }
}

/// Parse a numeric cell tolerantly: strips `$`, `%`, thousands separators and
/// whitespace; accounting-style parentheses mean negative.
pub(crate) fn parse_decimal_loose(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value = Decimal::from_str(&cleaned).ok()?;
    Some(if negative { -value } else { value })
}

/// Dates in ETF feeds arrive as month/day/year with assorted separators and
/// occasionally ISO. First format that parses wins.
pub(crate) fn parse_date_loose(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim().trim_matches('"');
    for fmt in ["%m/%d/%Y", "%m/%d/%y", "%Y-%m-%d", "%m-%d-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn loose_decimal_parsing() {
        assert_eq!(parse_decimal_loose("1,234,567"), Some(dec!(1234567)));
        assert_eq!(parse_decimal_loose("$12.50"), Some(dec!(12.50)));
        assert_eq!(parse_decimal_loose("3.25%"), Some(dec!(3.25)));
        assert_eq!(parse_decimal_loose("(500)"), Some(dec!(-500)));
        assert_eq!(parse_decimal_loose("  "), None);
        assert_eq!(parse_decimal_loose("n/a"), None);
    }

    #[test]
    fn loose_date_parsing() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date_loose("03/15/2024"), Some(expected));
        assert_eq!(parse_date_loose("3/15/24"), Some(expected));
        assert_eq!(parse_date_loose("2024-03-15"), Some(expected));
        assert_eq!(parse_date_loose("not a date"), None);
    }
}
