//! Static startup configuration: providers, rate limits, cost policy, and routing.
//!
//! None of these structs mandate a file format (TOML, JSON, YAML are all equally
//! valid): they derive `serde::Deserialize` so an embedding binary can load them
//! however it likes. This module itself only resolves the one thing that should
//! never live in a config file: API keys, read from the environment variable
//! named by `api_key_env`, following the same override-friendly style the
//! structural model for this crate uses for its own `OPEN_AGENT_BASE_URL`.

use serde::{Deserialize, Serialize};
use std::env;

/// One upstream provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_rpm")]
    pub rpm_limit: u32,
    #[serde(default)]
    pub tpm_limit: Option<u32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_rpm() -> u32 {
    60
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Resolves the API key from `api_key_env`. Missing-key is a non-retryable
    /// local construction error per the provider contract (§4.1): it must fail
    /// fast at registration, not at call time.
    pub fn resolve_api_key(&self) -> crate::Result<String> {
        env::var(&self.api_key_env).map_err(|_| {
            crate::Error::config(format!(
                "missing API key: environment variable {} is not set",
                self.api_key_env
            ))
        })
    }
}

/// Per-provider rate-limit configuration (§3 Rate-Limit Provider Config).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub rpm: u32,
    #[serde(default)]
    pub tpm: Option<u32>,
    pub burst: u32,
    #[serde(default = "default_window_size")]
    pub window_size: u64,
}

fn default_window_size() -> u64 {
    60
}

impl RateLimitConfig {
    pub fn new(rpm: u32, burst: u32) -> Self {
        Self {
            rpm,
            tpm: None,
            burst: burst.max(1),
            window_size: default_window_size(),
        }
    }

    /// Refill rate in tokens/second, continuous (not tick-scheduled).
    pub fn refill_per_second(&self) -> f64 {
        self.rpm as f64 / 60.0
    }
}

/// Global (process-wide) rate-limit settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GlobalLimitsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout: u64,
}

fn default_max_concurrent() -> usize {
    12
}

impl Default for GlobalLimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_timeout: default_timeout_secs(),
        }
    }
}

/// Action taken when the daily cost budget is exhausted (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetExceededAction {
    FallbackToFree,
    HardStop,
}

/// Cost policy: budget, alerting threshold, and per-complexity routing preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "default_daily_budget")]
    pub daily_budget: f64,
    #[serde(default = "default_alert_percent")]
    pub alert_at_percent: f64,
    #[serde(default = "default_budget_action")]
    pub budget_exceeded_action: BudgetExceededAction,
    #[serde(default)]
    pub routing_rules: std::collections::HashMap<String, Vec<String>>,
}

fn default_daily_budget() -> f64 {
    5.0
}
fn default_alert_percent() -> f64 {
    80.0
}
fn default_budget_action() -> BudgetExceededAction {
    BudgetExceededAction::FallbackToFree
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            daily_budget: default_daily_budget(),
            alert_at_percent: default_alert_percent(),
            budget_exceeded_action: default_budget_action(),
            routing_rules: std::collections::HashMap::new(),
        }
    }
}

/// Per-agent provider fallback chain (§3 Provider Fallback Chain).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// agent_id -> ordered chain of provider names. The key `"default"` applies
    /// to any agent not otherwise mapped.
    #[serde(default)]
    pub chains: std::collections::HashMap<String, Vec<String>>,
}

impl RouterConfig {
    pub fn chain_for(&self, agent_id: &str) -> Option<&[String]> {
        self.chains
            .get(agent_id)
            .or_else(|| self.chains.get("default"))
            .map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_resolves_api_key_from_env() {
        // SAFETY: test-local environment variable, not used elsewhere in the process.
        unsafe {
            env::set_var("LLM_GATEWAY_TEST_KEY", "secret123");
        }
        let cfg = ProviderConfig {
            name: "groq".to_string(),
            provider_type: "groq".to_string(),
            model: "llama-3.1-70b".to_string(),
            api_key_env: "LLM_GATEWAY_TEST_KEY".to_string(),
            base_url: None,
            rpm_limit: 30,
            tpm_limit: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout: 30,
            enabled: true,
        };
        assert_eq!(cfg.resolve_api_key().unwrap(), "secret123");
        // SAFETY: cleanup of the same test-local variable.
        unsafe {
            env::remove_var("LLM_GATEWAY_TEST_KEY");
        }
    }

    #[test]
    fn provider_config_missing_key_fails_fast() {
        let cfg = ProviderConfig {
            name: "groq".to_string(),
            provider_type: "groq".to_string(),
            model: "llama-3.1-70b".to_string(),
            api_key_env: "LLM_GATEWAY_DEFINITELY_UNSET_KEY".to_string(),
            base_url: None,
            rpm_limit: 30,
            tpm_limit: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout: 30,
            enabled: true,
        };
        assert!(cfg.resolve_api_key().is_err());
    }

    #[test]
    fn rate_limit_config_derives_refill_rate() {
        let cfg = RateLimitConfig::new(30, 10);
        assert_eq!(cfg.refill_per_second(), 0.5);
        assert_eq!(cfg.burst, 10);
    }

    #[test]
    fn rate_limit_config_burst_floor_is_one() {
        let cfg = RateLimitConfig::new(30, 0);
        assert_eq!(cfg.burst, 1);
    }

    #[test]
    fn router_config_falls_back_to_default_chain() {
        let mut chains = std::collections::HashMap::new();
        chains.insert("default".to_string(), vec!["groq".to_string()]);
        let router = RouterConfig { chains };
        assert_eq!(router.chain_for("unmapped-agent"), Some(&["groq".to_string()][..]));
    }
}
