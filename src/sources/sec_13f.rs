use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::Event;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use super::http::FeedClient;
use super::{NormalizedHolding, ParsedDisclosure};
use crate::error::IngestError;

const SUBMISSIONS_URL: &str = "https://data.sec.gov/submissions";
const ARCHIVES_URL: &str = "https://www.sec.gov/Archives/edgar/data";

/// 13F info tables report position values in thousands of dollars.
const VALUE_SCALE: Decimal = dec!(1000);

#[derive(Debug, Deserialize)]
struct SubmissionsResponse {
    filings: Filings,
}

#[derive(Debug, Deserialize)]
struct Filings {
    recent: RecentFilings,
}

/// EDGAR serves the filing index as parallel arrays, newest first.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    form: Vec<String>,
    filing_date: Vec<String>,
    #[serde(default)]
    report_date: Vec<String>,
    accession_number: Vec<String>,
    primary_document: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FilingIndex {
    directory: FilingDirectory,
}

#[derive(Debug, Deserialize)]
struct FilingDirectory {
    item: Vec<FilingIndexItem>,
}

#[derive(Debug, Deserialize)]
struct FilingIndexItem {
    name: String,
}

#[derive(Debug, Clone)]
struct FilingRef {
    accession: String,
    filing_date: NaiveDate,
    period_end_date: Option<NaiveDate>,
    primary_document: String,
}

pub struct Sec13fAdapter {
    cik: String,
    client: FeedClient,
}

impl Sec13fAdapter {
    pub fn new(cik: String, client: FeedClient) -> Self {
        Self { cik, client }
    }

    #[instrument(skip(self), fields(cik = %self.cik))]
    pub async fn fetch_and_parse(&self) -> Result<ParsedDisclosure, IngestError> {
        let cik_digits = self.cik.trim_start_matches('0');
        let submissions_url = format!("{SUBMISSIONS_URL}/CIK{:0>10}.json", cik_digits);
        let submissions: SubmissionsResponse = self.client.get_json(&submissions_url).await?;

        let filing = latest_13f_filing(&submissions.filings.recent).ok_or_else(|| {
            IngestError::PermanentFetch(format!("CIK {} has no 13F-HR filings", self.cik))
        })?;
        debug!(accession = %filing.accession, filing_date = %filing.filing_date, "Selected 13F filing");

        let accession_dir = filing.accession.replace('-', "");
        let index_url = format!("{ARCHIVES_URL}/{cik_digits}/{accession_dir}/index.json");
        let index: FilingIndex = self.client.get_json(&index_url).await?;
        let names: Vec<String> = index.directory.item.into_iter().map(|i| i.name).collect();

        let info_table_name =
            pick_info_table(&names, &filing.primary_document).ok_or_else(|| {
                IngestError::PermanentFetch(format!(
                    "filing {} has no info-table XML document",
                    filing.accession
                ))
            })?;

        let doc_url = format!("{ARCHIVES_URL}/{cik_digits}/{accession_dir}/{info_table_name}");
        let xml = self.client.get_text(&doc_url).await?;
        if xml.trim().is_empty() {
            return Err(IngestError::PermanentFetch(format!(
                "info table {doc_url} is empty"
            )));
        }

        let (holdings, skipped_rows) = parse_info_table(&xml)?;
        if skipped_rows > 0 {
            warn!(skipped_rows, parsed = holdings.len(), accession = %filing.accession, "Skipped malformed info-table entries");
        }

        Ok(ParsedDisclosure {
            snapshot_date: filing.filing_date,
            filing_date: Some(filing.filing_date),
            period_end_date: filing.period_end_date,
            holdings,
            skipped_rows,
        })
    }
}

/// Newest 13F-HR or 13F-HR amendment in the filing index.
fn latest_13f_filing(recent: &RecentFilings) -> Option<FilingRef> {
    recent.form.iter().enumerate().find_map(|(i, form)| {
        if form != "13F-HR" && form != "13F-HR/A" {
            return None;
        }
        let filing_date =
            NaiveDate::parse_from_str(recent.filing_date.get(i)?, "%Y-%m-%d").ok()?;
        Some(FilingRef {
            accession: recent.accession_number.get(i)?.clone(),
            filing_date,
            period_end_date: recent
                .report_date
                .get(i)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            primary_document: recent.primary_document.get(i)?.clone(),
        })
    })
}

/// Pick the structured-holdings document from a filing's file index: prefer a
/// filename containing "infotable", else any XML that is not the primary
/// document or the auto-generated index.
fn pick_info_table<'a>(names: &'a [String], primary_document: &str) -> Option<&'a str> {
    let is_xml = |n: &str| n.to_lowercase().ends_with(".xml");
    names
        .iter()
        .find(|n| is_xml(n) && n.to_lowercase().contains("infotable"))
        .or_else(|| {
            names.iter().find(|n| {
                let lower = n.to_lowercase();
                is_xml(n)
                    && n.as_str() != primary_document
                    && lower != "primary_doc.xml"
                    && !lower.ends_with("-index.xml")
            })
        })
        .map(String::as_str)
}

#[derive(Debug, Default)]
struct RawEntry {
    name_of_issuer: Option<String>,
    cusip: Option<String>,
    value: Option<Decimal>,
    shares: Option<Decimal>,
}

/// Namespace-stripped parse of the repeated `<infoTable>` entries. Entries
/// sharing a CUSIP are summed because large filers report one security across
/// multiple class/authority rows.
fn parse_info_table(xml: &str) -> Result<(Vec<NormalizedHolding>, usize), IngestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut aggregated: BTreeMap<String, NormalizedHolding> = BTreeMap::new();
    let mut current: Option<RawEntry> = None;
    let mut field: Option<&'static str> = None;
    let mut entry_count = 0usize;
    let mut skipped = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                // local_name drops the namespace prefix (ns1:infoTable -> infoTable)
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                match name.as_str() {
                    "infotable" => current = Some(RawEntry::default()),
                    "nameofissuer" => field = Some("name"),
                    "cusip" => field = Some("cusip"),
                    "value" => field = Some("value"),
                    "sshprnamt" => field = Some("shares"),
                    _ => field = None,
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| IngestError::Parse(format!("info table text: {e}")))?
                        .trim()
                        .to_string();
                    match f {
                        "name" => entry.name_of_issuer = Some(text),
                        "cusip" => entry.cusip = Some(text.to_uppercase()),
                        "value" => entry.value = super::parse_decimal_loose(&text),
                        "shares" => entry.shares = super::parse_decimal_loose(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                if name == "infotable" {
                    entry_count += 1;
                    match current.take() {
                        Some(RawEntry {
                            cusip: Some(cusip),
                            shares: Some(shares),
                            name_of_issuer,
                            value,
                        }) if !cusip.is_empty() => {
                            let scaled_value = value.map(|v| v * VALUE_SCALE);
                            aggregated
                                .entry(cusip.clone())
                                .and_modify(|h| {
                                    h.shares += shares;
                                    h.market_value = match (h.market_value, scaled_value) {
                                        (Some(a), Some(b)) => Some(a + b),
                                        (a, b) => a.or(b),
                                    };
                                })
                                .or_insert(NormalizedHolding {
                                    ticker: None,
                                    company_name: name_of_issuer,
                                    cusip: Some(cusip),
                                    shares,
                                    market_value: scaled_value,
                                    weight_percent: None,
                                });
                        }
                        _ => skipped += 1,
                    }
                } else {
                    field = None;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(IngestError::Parse(format!("info table XML: {e}"))),
        }
    }

    if entry_count > 0 && aggregated.is_empty() {
        return Err(IngestError::Parse(format!(
            "none of {entry_count} info-table entries parsed"
        )));
    }
    if entry_count == 0 {
        return Err(IngestError::PermanentFetch(
            "info table contains no entries".to_string(),
        ));
    }

    let mut holdings: Vec<NormalizedHolding> = aggregated.into_values().collect();
    let total_value: Decimal = holdings.iter().filter_map(|h| h.market_value).sum();
    if total_value > Decimal::ZERO {
        for holding in &mut holdings {
            holding.weight_percent = holding
                .market_value
                .map(|v| v / total_value * dec!(100));
        }
    }
    Ok((holdings, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_TABLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ns1:informationTable xmlns:ns1="http://www.sec.gov/edgar/document/thirteenf/informationtable">
  <ns1:infoTable>
    <ns1:nameOfIssuer>KRAFT HEINZ CO</ns1:nameOfIssuer>
    <ns1:cusip>500754106</ns1:cusip>
    <ns1:value>30</ns1:value>
    <ns1:shrsOrPrnAmt>
      <ns1:sshPrnamt>1000</ns1:sshPrnamt>
      <ns1:sshPrnamtType>SH</ns1:sshPrnamtType>
    </ns1:shrsOrPrnAmt>
  </ns1:infoTable>
  <ns1:infoTable>
    <ns1:nameOfIssuer>KRAFT HEINZ CO</ns1:nameOfIssuer>
    <ns1:cusip>500754106</ns1:cusip>
    <ns1:value>60</ns1:value>
    <ns1:shrsOrPrnAmt>
      <ns1:sshPrnamt>2000</ns1:sshPrnamt>
      <ns1:sshPrnamtType>SH</ns1:sshPrnamtType>
    </ns1:shrsOrPrnAmt>
  </ns1:infoTable>
  <ns1:infoTable>
    <ns1:nameOfIssuer>APPLE INC</ns1:nameOfIssuer>
    <ns1:cusip>037833100</ns1:cusip>
    <ns1:value>910</ns1:value>
    <ns1:shrsOrPrnAmt>
      <ns1:sshPrnamt>5000</ns1:sshPrnamt>
      <ns1:sshPrnamtType>SH</ns1:sshPrnamtType>
    </ns1:shrsOrPrnAmt>
  </ns1:infoTable>
</ns1:informationTable>
"#;

    #[test]
    fn same_cusip_entries_are_summed() {
        let (holdings, skipped) = parse_info_table(INFO_TABLE_XML).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(holdings.len(), 2);

        let kraft = holdings
            .iter()
            .find(|h| h.cusip.as_deref() == Some("500754106"))
            .unwrap();
        assert_eq!(kraft.shares, dec!(3000));
        // 30 + 60 reported in thousands
        assert_eq!(kraft.market_value, Some(dec!(90000)));
        assert_eq!(kraft.company_name.as_deref(), Some("KRAFT HEINZ CO"));
        assert!(kraft.ticker.is_none());
    }

    #[test]
    fn weights_are_derived_from_summed_values() {
        let (holdings, _) = parse_info_table(INFO_TABLE_XML).unwrap();
        let total: Decimal = holdings.iter().filter_map(|h| h.market_value).sum();
        assert_eq!(total, dec!(1000000));
        let kraft = holdings
            .iter()
            .find(|h| h.cusip.as_deref() == Some("500754106"))
            .unwrap();
        assert_eq!(kraft.weight_percent, Some(dec!(9)));
    }

    #[test]
    fn entry_without_cusip_is_skipped() {
        let xml = r#"<informationTable>
          <infoTable>
            <nameOfIssuer>MYSTERY CO</nameOfIssuer>
            <value>10</value>
            <shrsOrPrnAmt><sshPrnamt>100</sshPrnamt></shrsOrPrnAmt>
          </infoTable>
          <infoTable>
            <nameOfIssuer>REAL CO</nameOfIssuer>
            <cusip>123456789</cusip>
            <value>20</value>
            <shrsOrPrnAmt><sshPrnamt>200</sshPrnamt></shrsOrPrnAmt>
          </infoTable>
        </informationTable>"#;
        let (holdings, skipped) = parse_info_table(xml).unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn empty_table_is_permanent_failure() {
        match parse_info_table("<informationTable></informationTable>") {
            Err(IngestError::PermanentFetch(_)) => {}
            other => panic!("expected permanent failure, got {other:?}"),
        }
    }

    #[test]
    fn info_table_name_is_preferred() {
        let names = vec![
            "primary_doc.xml".to_string(),
            "form13fInfoTable.xml".to_string(),
            "report.txt".to_string(),
        ];
        assert_eq!(pick_info_table(&names, "primary_doc.xml"), Some("form13fInfoTable.xml"));
    }

    #[test]
    fn falls_back_to_non_primary_xml() {
        let names = vec![
            "primary_doc.xml".to_string(),
            "0001067983-24-000001-index.xml".to_string(),
            "holdings.xml".to_string(),
        ];
        assert_eq!(pick_info_table(&names, "primary_doc.xml"), Some("holdings.xml"));
    }

    #[test]
    fn no_candidate_yields_none() {
        let names = vec!["primary_doc.xml".to_string(), "report.pdf".to_string()];
        assert_eq!(pick_info_table(&names, "primary_doc.xml"), None);
    }

    #[test]
    fn newest_13f_filing_is_selected() {
        let recent = RecentFilings {
            form: vec!["8-K".into(), "13F-HR/A".into(), "13F-HR".into()],
            filing_date: vec!["2024-05-01".into(), "2024-03-02".into(), "2024-02-14".into()],
            report_date: vec!["".into(), "2023-12-31".into(), "2023-12-31".into()],
            accession_number: vec![
                "0000000000-24-000003".into(),
                "0000000000-24-000002".into(),
                "0000000000-24-000001".into(),
            ],
            primary_document: vec!["a.htm".into(), "primary_doc.xml".into(), "primary_doc.xml".into()],
        };
        let filing = latest_13f_filing(&recent).unwrap();
        assert_eq!(filing.accession, "0000000000-24-000002");
        assert_eq!(filing.filing_date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(
            filing.period_end_date,
            Some(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap())
        );
    }
}
