//! PII scrubber (C17): advisory-only scan over free-form text. Never blocks —
//! the orchestrator logs the report and proceeds regardless of its contents.

use regex::Regex;
use std::sync::LazyLock;

/// One matched span of a detected PII type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiMatch {
    pub pii_type: &'static str,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiReport {
    pub has_pii: bool,
    pub matches: Vec<PiiMatch>,
    pub pii_types: Vec<&'static str>,
    pub recommendation: String,
}

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
});
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b").unwrap()
});
static SSN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CREDIT_CARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap());
static IP_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:25[0-5]|2[0-4]\d|1?\d?\d)(?:\.(?:25[0-5]|2[0-4]\d|1?\d?\d)){3}\b").unwrap()
});

/// Luhn checksum over the digits of `candidate`, ignoring separators.
fn passes_luhn(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Scans `text` for a conventional, testable set of PII types: email, phone,
/// US SSN, credit card (Luhn-checked), IP address. Order of detection matches
/// the order types are reported in `pii_types`.
pub fn detect(text: &str) -> PiiReport {
    let mut matches = Vec::new();

    for m in EMAIL_RE.find_iter(text) {
        matches.push(PiiMatch { pii_type: "email", start: m.start(), end: m.end() });
    }
    for m in SSN_RE.find_iter(text) {
        matches.push(PiiMatch { pii_type: "ssn", start: m.start(), end: m.end() });
    }
    for m in CREDIT_CARD_RE.find_iter(text) {
        if passes_luhn(m.as_str()) {
            matches.push(PiiMatch { pii_type: "credit_card", start: m.start(), end: m.end() });
        }
    }
    for m in PHONE_RE.find_iter(text) {
        matches.push(PiiMatch { pii_type: "phone", start: m.start(), end: m.end() });
    }
    for m in IP_ADDRESS_RE.find_iter(text) {
        matches.push(PiiMatch { pii_type: "ip_address", start: m.start(), end: m.end() });
    }

    matches.sort_by_key(|m| m.start);

    let mut pii_types: Vec<&'static str> = matches.iter().map(|m| m.pii_type).collect();
    pii_types.dedup();

    let has_pii = !matches.is_empty();
    let recommendation = if has_pii {
        format!(
            "detected {} potential PII item(s) ({}); consider redacting before persisting or forwarding upstream",
            matches.len(),
            pii_types.join(", ")
        )
    } else {
        "no PII detected".to_string()
    };

    PiiReport { has_pii, matches, pii_types, recommendation }
}
