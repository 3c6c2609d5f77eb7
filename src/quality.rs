//! Quality validator (C10): a pure function over a response's content and
//! finish reason that scores it and recommends tier escalation.

/// Escalation tiers, cheapest first. `next()` returns `None` once escalated
/// past `Ultimate` — there is nowhere further to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Worker,
    Boss,
    Ultimate,
}

impl Tier {
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Worker => Some(Tier::Boss),
            Tier::Boss => Some(Tier::Ultimate),
            Tier::Ultimate => None,
        }
    }

    fn min_length(self) -> usize {
        match self {
            Tier::Worker => 50,
            Tier::Boss => 200,
            Tier::Ultimate => 200,
        }
    }
}

/// Default error-marker word list, carried verbatim from the reference
/// implementation (§1.2 supplement). Matching is case-insensitive substring.
pub const ERROR_MARKERS: &[&str] = &[
    "i cannot",
    "i don't know",
    "i'm not able to",
    "[error]",
    "failed to",
    "unable to process",
    "as an ai",
];

/// Default hedging-phrase list for low-confidence detection (§1.2 supplement).
pub const LOW_CONFIDENCE_MARKERS: &[&str] = &[
    "maybe",
    "perhaps",
    "i think",
    "possibly",
    "i believe",
    "not sure",
    "might be",
    "could be",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Issue {
    TooShort,
    ErrorMarker,
    LowConfidence,
    Incomplete,
    Corrupted,
}

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub issues: Vec<Issue>,
    pub quality_score: f64,
    pub is_valid: bool,
    pub should_escalate: bool,
    pub escalate_to: Option<Tier>,
}

/// Validator configuration; defaults match the reference implementation's
/// hardcoded lists, but both are overridable per §9's note that they should
/// be configuration rather than baked-in constants.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    pub error_markers: Vec<String>,
    pub low_confidence_markers: Vec<String>,
    pub low_confidence_threshold: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            error_markers: ERROR_MARKERS.iter().map(|s| s.to_string()).collect(),
            low_confidence_markers: LOW_CONFIDENCE_MARKERS.iter().map(|s| s.to_string()).collect(),
            low_confidence_threshold: 3,
        }
    }
}

/// Evaluates `content`/`finish_reason` produced at `tier` and recommends
/// whether to escalate. Deduction order matches the reference implementation:
/// too-short -0.3, error marker -0.4, low-confidence -0.2, incomplete -0.1,
/// corrupted -0.3, clamped to `[0, 1]`.
pub fn validate(content: &str, finish_reason: &str, tier: Tier, config: &QualityConfig) -> QualityReport {
    let lower = content.to_lowercase();
    let mut issues = Vec::new();
    let mut score: f64 = 1.0;

    if content.chars().count() < tier.min_length() {
        issues.push(Issue::TooShort);
        score -= 0.3;
    }

    if config.error_markers.iter().any(|m| lower.contains(m.as_str())) {
        issues.push(Issue::ErrorMarker);
        score -= 0.4;
    }

    let hedge_count = config
        .low_confidence_markers
        .iter()
        .filter(|m| lower.contains(m.as_str()))
        .count();
    if hedge_count >= config.low_confidence_threshold {
        issues.push(Issue::LowConfidence);
        score -= 0.2;
    }

    let ends_properly = content
        .trim_end()
        .chars()
        .next_back()
        .is_some_and(|c| matches!(c, '.' | '!' | '?'));
    if finish_reason == "length" && !ends_properly {
        issues.push(Issue::Incomplete);
        score -= 0.1;
    }

    let open_braces = content.matches('{').count();
    let close_braces = content.matches('}').count();
    if open_braces != close_braces {
        issues.push(Issue::Corrupted);
        score -= 0.3;
    }

    let quality_score = score.clamp(0.0, 1.0);
    let is_valid = quality_score >= 0.6;
    let has_error_marker = issues.contains(&Issue::ErrorMarker);
    let worker_multi_issue = tier == Tier::Worker && issues.len() >= 2;
    let should_escalate = !is_valid || has_error_marker || worker_multi_issue;

    QualityReport {
        issues,
        quality_score,
        is_valid,
        should_escalate,
        escalate_to: if should_escalate { tier.next() } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_worker_response_is_flagged_and_not_escalated_alone() {
        let config = QualityConfig::default();
        let report = validate("too short", "stop", Tier::Worker, &config);
        assert!(report.issues.contains(&Issue::TooShort));
        assert!((report.quality_score - 0.7).abs() < 1e-9);
        assert!(!report.should_escalate);
    }

    #[test]
    fn error_marker_always_escalates() {
        let config = QualityConfig::default();
        let long_enough = "I cannot help with that particular request at this time unfortunately.";
        let report = validate(long_enough, "stop", Tier::Boss, &config);
        assert!(report.issues.contains(&Issue::ErrorMarker));
        assert!(report.should_escalate);
        assert_eq!(report.escalate_to, Some(Tier::Ultimate));
    }

    #[test]
    fn worker_tier_escalates_on_two_minor_issues() {
        let config = QualityConfig::default();
        // too short + low confidence (3 hedges) but no error marker.
        let content = "maybe perhaps i think so";
        let report = validate(content, "stop", Tier::Worker, &config);
        assert!(report.issues.len() >= 2);
        assert!(report.should_escalate);
    }

    #[test]
    fn incomplete_detected_when_truncated_mid_sentence() {
        let config = QualityConfig::default();
        let content = "This is a reasonably long response that got cut off mid";
        let report = validate(content, "length", Tier::Boss, &config);
        assert!(report.issues.contains(&Issue::Incomplete));
    }

    #[test]
    fn mismatched_braces_detected_as_corrupted() {
        let config = QualityConfig::default();
        let content = "Here is the result: { \"key\": \"value\" ";
        let report = validate(content, "stop", Tier::Boss, &config);
        assert!(report.issues.contains(&Issue::Corrupted));
    }

    #[test]
    fn ultimate_tier_has_no_further_escalation() {
        assert_eq!(Tier::Ultimate.next(), None);
    }

    #[test]
    fn valid_response_does_not_escalate() {
        let config = QualityConfig::default();
        let content = "This is a clear, complete, and well-formed response to the request.";
        let report = validate(content, "stop", Tier::Boss, &config);
        assert!(report.is_valid);
        assert!(!report.should_escalate);
    }
}
