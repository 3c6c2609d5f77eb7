//! Error types for the orchestration gateway

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Bad request payload, unknown agent, or unregistered provider
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Upstream rate limit (HTTP 429 or SDK equivalent)
    #[error("rate limited by {provider}{}", retry_after.map(|d| format!(" (retry after {:.1}s)", d.as_secs_f64())).unwrap_or_default())]
    RateLimit {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// Upstream connection or read timeout
    #[error("timeout calling {provider}")]
    Timeout { provider: String },

    /// Any other upstream error
    #[error("API error from {provider}{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Api {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Plan validation failure; never retried
    #[error("process compliance error: {0}")]
    ProcessCompliance(String),

    /// Fallback chain exhausted
    #[error("all providers failed for agent {agent_id}: {chain:?}")]
    AllProvidersFailed {
        agent_id: String,
        chain: Vec<String>,
        errors_by_provider: HashMap<String, String>,
    },

    /// Requested agent is not registered
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Error::InputError(msg.into())
    }

    pub fn rate_limit(provider: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Error::RateLimit {
            provider: provider.into(),
            retry_after,
        }
    }

    pub fn timeout(provider: impl Into<String>) -> Self {
        Error::Timeout {
            provider: provider.into(),
        }
    }

    pub fn api(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Api {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn process_compliance(msg: impl Into<String>) -> Self {
        Error::ProcessCompliance(msg.into())
    }

    pub fn agent_not_found(id: impl Into<String>) -> Self {
        Error::AgentNotFound(id.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Default retryable-status-code set used when none is configured.
    pub fn default_retryable_statuses() -> &'static [u16] {
        &[500, 502, 503, 504]
    }

    /// Whether this error should trigger a retry, given the configured set of
    /// retryable API status codes. `RateLimit` and `Timeout` are always retryable;
    /// `Api` is retryable only if its status is in `retryable_statuses`.
    pub fn is_retryable(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            Error::RateLimit { .. } | Error::Timeout { .. } => true,
            Error::Api { status: Some(s), .. } => retryable_statuses.contains(s),
            Error::Api { status: None, .. } => false,
            Error::Http(_) => true,
            _ => false,
        }
    }

    /// Coarse classification used for metric labels (`error_type`).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::RateLimit { .. } => "rate_limit",
            Error::Timeout { .. } => "timeout",
            Error::Api { .. } => "api",
            Error::InputError(_) => "input",
            Error::ProcessCompliance(_) => "process_compliance",
            Error::AllProvidersFailed { .. } => "all_providers_failed",
            Error::AgentNotFound(_) => "agent_not_found",
            Error::Config(_) => "config",
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Other(_) => "other",
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Error::RateLimit { provider, .. }
            | Error::Timeout { provider }
            | Error::Api { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_retryable() {
        let err = Error::rate_limit("groq", Some(Duration::from_secs(1)));
        assert!(err.is_retryable(Error::default_retryable_statuses()));
        assert_eq!(err.kind(), "rate_limit");
    }

    #[test]
    fn api_error_retryable_only_for_configured_statuses() {
        let retryable = Error::api("groq", Some(503), "bad gateway");
        assert!(retryable.is_retryable(Error::default_retryable_statuses()));

        let not_retryable = Error::api("groq", Some(400), "bad request");
        assert!(!not_retryable.is_retryable(Error::default_retryable_statuses()));
    }

    #[test]
    fn input_error_never_retryable() {
        let err = Error::input("task too long");
        assert!(!err.is_retryable(Error::default_retryable_statuses()));
    }

    #[test]
    fn all_providers_failed_carries_per_provider_errors() {
        let mut errs = HashMap::new();
        errs.insert("p1".to_string(), "rate limited".to_string());
        let err = Error::AllProvidersFailed {
            agent_id: "analyst".to_string(),
            chain: vec!["p1".to_string()],
            errors_by_provider: errs,
        };
        assert_eq!(err.kind(), "all_providers_failed");
    }

    #[test]
    fn result_type_alias_compiles() {
        fn _ok() -> Result<i32> {
            Ok(1)
        }
        fn _err() -> Result<i32> {
            Err(Error::timeout("groq"))
        }
    }
}
