use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};

/// Position moves smaller than this (in percent of prior shares) are treated
/// as reporting noise and never become changes. NEW and SOLD_OUT positions
/// bypass the floor entirely.
pub const NOISE_FLOOR_PERCENT: Decimal = dec!(0.1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    New,
    Added,
    Reduced,
    SoldOut,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::New => "NEW",
            ChangeType::Added => "ADDED",
            ChangeType::Reduced => "REDUCED",
            ChangeType::SoldOut => "SOLD_OUT",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How positions are keyed when matching the two sides of a diff.
///
/// Regulatory filings key by cusip when available because one security can
/// appear under multiple tickers; daily ETF feeds key by ticker because their
/// cusip coverage is sparse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    CusipPreferred,
    TickerOnly,
}

impl KeyPolicy {
    pub fn key_for(&self, ticker: &str, cusip: Option<&str>) -> String {
        match self {
            KeyPolicy::CusipPreferred => match cusip {
                Some(c) if !c.is_empty() => c.to_string(),
                _ => ticker.to_string(),
            },
            KeyPolicy::TickerOnly => ticker.to_string(),
        }
    }
}

/// One side of a diff for a single security.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub shares: Decimal,
    pub weight_percent: Option<Decimal>,
    pub market_value: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct HoldingsDelta {
    pub key: String,
    pub ticker: String,
    pub change_type: ChangeType,
    pub shares_before: Option<Decimal>,
    pub shares_after: Option<Decimal>,
    pub shares_delta: Decimal,
    pub shares_delta_percent: Option<Decimal>,
    pub weight_before: Option<Decimal>,
    pub weight_after: Option<Decimal>,
    pub weight_delta: Option<Decimal>,
    pub value_before: Option<Decimal>,
    pub value_after: Option<Decimal>,
    pub value_delta: Option<Decimal>,
    pub price_range_low: Option<Decimal>,
    pub price_range_high: Option<Decimal>,
}

/// Classified, ordered differences between two snapshots of one portfolio.
///
/// Output ordering surfaces the most portfolio-significant moves first:
/// descending |weight_delta| (null as zero), then descending |value_delta|
/// (null as zero), then lexicographic by key.
pub fn compute_diff(
    old: &BTreeMap<String, Position>,
    new: &BTreeMap<String, Position>,
) -> Vec<HoldingsDelta> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut changes = Vec::new();

    for key in keys {
        match (old.get(key), new.get(key)) {
            (None, Some(n)) => changes.push(HoldingsDelta {
                key: key.clone(),
                ticker: n.ticker.clone(),
                change_type: ChangeType::New,
                shares_before: None,
                shares_after: Some(n.shares),
                shares_delta: n.shares,
                shares_delta_percent: None,
                weight_before: None,
                weight_after: n.weight_percent,
                weight_delta: n.weight_percent,
                value_before: None,
                value_after: n.market_value,
                value_delta: n.market_value,
                price_range_low: None,
                price_range_high: None,
            }),
            (Some(o), None) => changes.push(HoldingsDelta {
                key: key.clone(),
                ticker: o.ticker.clone(),
                change_type: ChangeType::SoldOut,
                shares_before: Some(o.shares),
                shares_after: None,
                shares_delta: -o.shares,
                // A full exit is always exactly -100%, regardless of size.
                shares_delta_percent: Some(dec!(-100)),
                weight_before: o.weight_percent,
                weight_after: None,
                weight_delta: o.weight_percent.map(|w| -w),
                value_before: o.market_value,
                value_after: None,
                value_delta: o.market_value.map(|v| -v),
                price_range_low: None,
                price_range_high: None,
            }),
            (Some(o), Some(n)) => {
                let shares_delta = n.shares - o.shares;
                if shares_delta.is_zero() {
                    continue;
                }
                let shares_delta_percent = if o.shares > Decimal::ZERO {
                    Some(shares_delta / o.shares * dec!(100))
                } else {
                    None
                };
                if let Some(pct) = shares_delta_percent {
                    if pct.abs() < NOISE_FLOOR_PERCENT {
                        continue;
                    }
                }
                let change_type = if shares_delta > Decimal::ZERO {
                    ChangeType::Added
                } else {
                    ChangeType::Reduced
                };
                changes.push(HoldingsDelta {
                    key: key.clone(),
                    ticker: n.ticker.clone(),
                    change_type,
                    shares_before: Some(o.shares),
                    shares_after: Some(n.shares),
                    shares_delta,
                    shares_delta_percent,
                    weight_before: o.weight_percent,
                    weight_after: n.weight_percent,
                    weight_delta: both(o.weight_percent, n.weight_percent),
                    value_before: o.market_value,
                    value_after: n.market_value,
                    value_delta: both(o.market_value, n.market_value),
                    price_range_low: None,
                    price_range_high: None,
                });
            }
            (None, None) => unreachable!(),
        }
    }

    changes.sort_by(|a, b| {
        let aw = a.weight_delta.map(|d| d.abs()).unwrap_or(Decimal::ZERO);
        let bw = b.weight_delta.map(|d| d.abs()).unwrap_or(Decimal::ZERO);
        let av = a.value_delta.map(|d| d.abs()).unwrap_or(Decimal::ZERO);
        let bv = b.value_delta.map(|d| d.abs()).unwrap_or(Decimal::ZERO);
        bw.cmp(&aw).then(bv.cmp(&av)).then(a.key.cmp(&b.key))
    });
    changes
}

fn both(before: Option<Decimal>, after: Option<Decimal>) -> Option<Decimal> {
    match (before, after) {
        (Some(b), Some(a)) => Some(a - b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(ticker: &str, shares: Decimal, weight: Option<Decimal>, value: Option<Decimal>) -> Position {
        Position {
            ticker: ticker.to_string(),
            shares,
            weight_percent: weight,
            market_value: value,
        }
    }

    fn map(entries: Vec<Position>) -> BTreeMap<String, Position> {
        entries.into_iter().map(|p| (p.ticker.clone(), p)).collect()
    }

    #[test]
    fn empty_inputs_produce_no_changes() {
        assert!(compute_diff(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn self_diff_is_empty() {
        let holdings = map(vec![
            pos("AAPL", dec!(1000), Some(dec!(5.0)), Some(dec!(150000))),
            pos("MSFT", dec!(500), None, None),
            pos("ZERO", dec!(0), None, None),
        ]);
        assert!(compute_diff(&holdings, &holdings).is_empty());
    }

    #[test]
    fn new_and_added_ordering_by_weight_delta() {
        let old = map(vec![pos("AAPL", dec!(1000), Some(dec!(5.0)), None)]);
        let new = map(vec![
            pos("AAPL", dec!(1200), Some(dec!(6.0)), None),
            pos("NVDA", dec!(300), Some(dec!(2.0)), None),
        ]);
        let changes = compute_diff(&old, &new);
        assert_eq!(changes.len(), 2);

        // NVDA first: |2.0| > |1.0|
        assert_eq!(changes[0].ticker, "NVDA");
        assert_eq!(changes[0].change_type, ChangeType::New);
        assert_eq!(changes[0].weight_delta, Some(dec!(2.0)));
        assert!(changes[0].shares_before.is_none());

        assert_eq!(changes[1].ticker, "AAPL");
        assert_eq!(changes[1].change_type, ChangeType::Added);
        assert_eq!(changes[1].shares_delta, dec!(200));
        assert_eq!(changes[1].shares_delta_percent, Some(dec!(20)));
        assert_eq!(changes[1].weight_delta, Some(dec!(1.0)));
    }

    #[test]
    fn sold_out_is_exactly_minus_one_hundred() {
        let old = map(vec![pos("TINY", dec!(3), Some(dec!(0.001)), Some(dec!(90)))]);
        let changes = compute_diff(&old, &BTreeMap::new());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::SoldOut);
        assert_eq!(changes[0].shares_delta_percent, Some(dec!(-100)));
        assert!(changes[0].shares_after.is_none());
        assert_eq!(changes[0].shares_delta, dec!(-3));
    }

    #[test]
    fn new_is_emitted_regardless_of_size() {
        let new = map(vec![pos("DUST", dec!(1), None, None)]);
        let changes = compute_diff(&BTreeMap::new(), &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::New);
        assert!(changes[0].shares_before.is_none());
        assert!(changes[0].shares_delta_percent.is_none());
    }

    #[test]
    fn sub_noise_floor_moves_are_dropped() {
        // 5 / 10000 = 0.05%, below the 0.1% floor
        let old = map(vec![pos("AAPL", dec!(10000), None, None)]);
        let new = map(vec![pos("AAPL", dec!(10005), None, None)]);
        assert!(compute_diff(&old, &new).is_empty());
    }

    #[test]
    fn moves_at_the_floor_survive() {
        // 10 / 10000 = 0.1%, exactly the floor: not strictly below, so kept
        let old = map(vec![pos("AAPL", dec!(10000), None, None)]);
        let new = map(vec![pos("AAPL", dec!(10010), None, None)]);
        let changes = compute_diff(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Added);
    }

    #[test]
    fn reduction_classified_by_delta_sign() {
        let old = map(vec![pos("XOM", dec!(800), Some(dec!(4.0)), Some(dec!(80000)))]);
        let new = map(vec![pos("XOM", dec!(600), Some(dec!(3.0)), Some(dec!(60000)))]);
        let changes = compute_diff(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Reduced);
        assert_eq!(changes[0].shares_delta, dec!(-200));
        assert_eq!(changes[0].shares_delta_percent, Some(dec!(-25)));
        assert_eq!(changes[0].value_delta, Some(dec!(-20000)));
    }

    #[test]
    fn weight_delta_null_when_either_side_missing() {
        let old = map(vec![pos("IBM", dec!(100), None, Some(dec!(10000)))]);
        let new = map(vec![pos("IBM", dec!(200), Some(dec!(1.5)), None)]);
        let changes = compute_diff(&old, &new);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].weight_delta.is_none());
        assert!(changes[0].value_delta.is_none());
    }

    #[test]
    fn ordering_is_monotone_in_abs_weight_delta() {
        let old = map(vec![
            pos("A", dec!(100), Some(dec!(1.0)), Some(dec!(1000))),
            pos("B", dec!(100), Some(dec!(2.0)), Some(dec!(2000))),
            pos("C", dec!(100), Some(dec!(3.0)), Some(dec!(3000))),
        ]);
        let new = map(vec![
            pos("A", dec!(400), Some(dec!(4.0)), Some(dec!(4000))),
            pos("B", dec!(150), Some(dec!(2.5)), Some(dec!(2500))),
            pos("D", dec!(50), Some(dec!(0.5)), Some(dec!(500))),
        ]);
        let changes = compute_diff(&old, &new);
        for pair in changes.windows(2) {
            let w0 = pair[0].weight_delta.map(|d| d.abs()).unwrap_or(Decimal::ZERO);
            let w1 = pair[1].weight_delta.map(|d| d.abs()).unwrap_or(Decimal::ZERO);
            assert!(w0 >= w1, "ordering violated: {} before {}", pair[0].key, pair[1].key);
        }
    }

    #[test]
    fn ties_break_by_value_delta_then_key() {
        let new = map(vec![
            pos("BBB", dec!(10), None, Some(dec!(500))),
            pos("AAA", dec!(10), None, Some(dec!(500))),
            pos("CCC", dec!(10), None, Some(dec!(900))),
        ]);
        let changes = compute_diff(&BTreeMap::new(), &new);
        let keys: Vec<&str> = changes.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["CCC", "AAA", "BBB"]);
    }

    #[test]
    fn key_policy_prefers_cusip_when_present() {
        let policy = KeyPolicy::CusipPreferred;
        assert_eq!(policy.key_for("AAPL", Some("037833100")), "037833100");
        assert_eq!(policy.key_for("AAPL", Some("")), "AAPL");
        assert_eq!(policy.key_for("AAPL", None), "AAPL");
        assert_eq!(KeyPolicy::TickerOnly.key_for("AAPL", Some("037833100")), "AAPL");
    }
}
