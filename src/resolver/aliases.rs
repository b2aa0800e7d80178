/// Curated company-name aliases for the deterministic resolution heuristic.
/// Keys are normalized issuer names (lowercase, punctuation and corporate
/// suffixes stripped). Deliberately small: only unambiguous large-cap names.
const NAME_ALIASES: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("microsoft", "MSFT"),
    ("nvidia", "NVDA"),
    ("amazon com", "AMZN"),
    ("amazon", "AMZN"),
    ("alphabet", "GOOGL"),
    ("google", "GOOGL"),
    ("meta platforms", "META"),
    ("tesla", "TSLA"),
    ("berkshire hathaway", "BRK.B"),
    ("jpmorgan chase", "JPM"),
    ("johnson johnson", "JNJ"),
    ("exxon mobil", "XOM"),
    ("unitedhealth group", "UNH"),
    ("visa", "V"),
    ("procter gamble", "PG"),
    ("mastercard", "MA"),
    ("broadcom", "AVGO"),
    ("eli lilly", "LLY"),
    ("chevron", "CVX"),
    ("coca cola", "KO"),
    ("pepsico", "PEP"),
    ("kraft heinz", "KHC"),
    ("bank of america", "BAC"),
    ("walmart", "WMT"),
    ("intel", "INTC"),
    ("advanced micro devices", "AMD"),
    ("international business machines", "IBM"),
    ("oracle", "ORCL"),
    ("salesforce", "CRM"),
];

const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "corp", "corporation", "co", "company", "ltd", "plc", "holdings",
    "group", "sa", "nv", "ag", "del", "new", "com",
];

/// Normalize an issuer name the way the alias table keys are normalized:
/// lowercase, punctuation dropped, trailing corporate suffixes stripped.
pub fn normalize_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = lowered.split_whitespace().collect();
    while let Some(last) = words.last() {
        if words.len() > 1 && CORPORATE_SUFFIXES.contains(last) {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

/// Exact lookup against the alias table after normalization. Deterministic:
/// the same hint always yields the same ticker or nothing; never a guess.
pub fn lookup(company_name_hint: &str) -> Option<&'static str> {
    let normalized = normalize_name(company_name_hint);
    if normalized.is_empty() {
        return None;
    }
    NAME_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, ticker)| *ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_suffixes_and_punctuation() {
        assert_eq!(normalize_name("APPLE INC"), "apple");
        assert_eq!(normalize_name("Johnson & Johnson"), "johnson johnson");
        assert_eq!(normalize_name("KRAFT HEINZ CO"), "kraft heinz");
        assert_eq!(normalize_name("Amazon.com, Inc."), "amazon");
    }

    #[test]
    fn known_names_resolve() {
        assert_eq!(lookup("APPLE INC"), Some("AAPL"));
        assert_eq!(lookup("NVIDIA CORPORATION"), Some("NVDA"));
        assert_eq!(lookup("KRAFT HEINZ CO"), Some("KHC"));
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert_eq!(lookup("Obscure Micro Cap Widgets LLC"), None);
        assert_eq!(lookup(""), None);
    }
}
