//! Cost optimizer (C11): routes by task complexity under a daily budget,
//! demoting to free-tier providers once the budget is exhausted, and records
//! post-hoc spend for reporting.

use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::{BudgetExceededAction, CostConfig};
use crate::types::Complexity;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct ProviderCost {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ProviderCost {
    pub const fn free() -> Self {
        Self {
            input_per_million: 0.0,
            output_per_million: 0.0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.input_per_million == 0.0 && self.output_per_million == 0.0
    }
}

/// Default per-1M-token price table (§1.2 supplement), carried from the
/// reference implementation so the optimizer works without a caller-supplied
/// table. Free-tier entries reflect providers whose API is currently
/// zero-cost (Groq, Cerebras, Gemini, OpenRouter's free catalog); the
/// remainder are representative paid aggregator/first-party prices.
pub fn default_cost_table() -> HashMap<String, ProviderCost> {
    let mut table = HashMap::new();
    table.insert("groq".to_string(), ProviderCost::free());
    table.insert("cerebras".to_string(), ProviderCost::free());
    table.insert("gemini".to_string(), ProviderCost::free());
    table.insert("openrouter".to_string(), ProviderCost::free());
    table.insert(
        "openai_mini".to_string(),
        ProviderCost {
            input_per_million: 0.15,
            output_per_million: 0.60,
        },
    );
    table.insert(
        "gemini_pro".to_string(),
        ProviderCost {
            input_per_million: 0.35,
            output_per_million: 1.05,
        },
    );
    table.insert(
        "openai".to_string(),
        ProviderCost {
            input_per_million: 2.50,
            output_per_million: 10.00,
        },
    );
    table.insert(
        "anthropic".to_string(),
        ProviderCost {
            input_per_million: 3.00,
            output_per_million: 15.00,
        },
    );
    table
}

#[derive(Debug, Default)]
struct CostState {
    daily_costs: HashMap<String, f64>,
    user_costs: HashMap<String, f64>,
    conversation_costs: HashMap<String, f64>,
    last_reset: Option<chrono::NaiveDate>,
    paid_requests_today: u64,
    free_requests_today: u64,
}

#[derive(Debug, Clone)]
pub struct CostStats {
    pub daily_budget: f64,
    pub daily_spend: f64,
    pub budget_remaining: f64,
    pub percent_used: f64,
    pub paid_requests: u64,
    pub free_requests: u64,
    pub costs_by_provider: HashMap<String, f64>,
}

pub struct CostOptimizer {
    config: CostConfig,
    cost_table: HashMap<String, ProviderCost>,
    state: Mutex<CostState>,
}

impl CostOptimizer {
    pub fn new(config: CostConfig) -> Self {
        Self::with_cost_table(config, default_cost_table())
    }

    pub fn with_cost_table(config: CostConfig, cost_table: HashMap<String, ProviderCost>) -> Self {
        Self {
            config,
            cost_table,
            state: Mutex::new(CostState::default()),
        }
    }

    fn cost_of(&self, provider: &str) -> ProviderCost {
        self.cost_table.get(provider).copied().unwrap_or(ProviderCost::free())
    }

    async fn reset_if_new_day(&self, state: &mut CostState) {
        let today = chrono::Local::now().date_naive();
        if state.last_reset != Some(today) {
            if let Some(prior) = state.last_reset {
                let total: f64 = state.daily_costs.values().sum();
                tracing::info!(date = %prior, total_spend = total, "daily cost reset");
            }
            state.daily_costs.clear();
            state.paid_requests_today = 0;
            state.free_requests_today = 0;
            state.last_reset = Some(today);
        }
    }

    /// Picks a provider for `complexity` from the configured routing
    /// preference list, demoting to free-tier members when the daily budget
    /// is exhausted and the policy is `fallback_to_free`, then intersecting
    /// with `available_set`.
    ///
    /// Returns `Err(Error::AllProvidersFailed)` when the intersection is
    /// empty even after considering the hardcoded safe default (`"groq"`) —
    /// the default is only ever returned when it is actually present in
    /// `available_set` (resolved open question, see DESIGN.md).
    pub async fn select_provider(
        &self,
        complexity: Complexity,
        available_set: &[String],
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        self.reset_if_new_day(&mut state).await;

        let mut preferred: Vec<String> = self
            .config
            .routing_rules
            .get(&complexity.to_string())
            .cloned()
            .unwrap_or_else(|| vec!["groq".to_string(), "gemini".to_string()]);

        let current_spend: f64 = state.daily_costs.values().sum();
        if current_spend >= self.config.daily_budget {
            tracing::warn!(
                current_spend,
                budget = self.config.daily_budget,
                "daily budget exceeded"
            );
            match self.config.budget_exceeded_action {
                BudgetExceededAction::FallbackToFree => {
                    preferred.retain(|p| self.cost_of(p).is_free());
                }
                BudgetExceededAction::HardStop => {
                    return Err(Error::process_compliance(format!(
                        "daily budget ${:.2} exceeded (spent ${current_spend:.2}) and budget_exceeded_action is hard_stop",
                        self.config.daily_budget
                    )));
                }
            }
        }

        preferred.retain(|p| available_set.iter().any(|a| a == p));

        if preferred.is_empty() {
            let default = "groq".to_string();
            return if available_set.iter().any(|a| a == &default) {
                Ok(default)
            } else {
                Err(Error::AllProvidersFailed {
                    agent_id: String::new(),
                    chain: available_set.to_vec(),
                    errors_by_provider: HashMap::new(),
                })
            };
        }

        Ok(preferred.into_iter().next().unwrap())
    }

    pub fn calculate_cost(&self, provider: &str, tokens_input: u32, tokens_output: u32) -> f64 {
        let cost = self.cost_of(provider);
        (tokens_input as f64 / 1_000_000.0) * cost.input_per_million
            + (tokens_output as f64 / 1_000_000.0) * cost.output_per_million
    }

    pub async fn record_usage(
        &self,
        provider: &str,
        tokens_input: u32,
        tokens_output: u32,
        user_id: Option<&str>,
        conversation_id: Option<&str>,
    ) {
        let cost = self.calculate_cost(provider, tokens_input, tokens_output);
        let mut state = self.state.lock().await;
        self.reset_if_new_day(&mut state).await;

        *state.daily_costs.entry(provider.to_string()).or_insert(0.0) += cost;
        if let Some(user_id) = user_id {
            *state.user_costs.entry(user_id.to_string()).or_insert(0.0) += cost;
        }
        if let Some(conversation_id) = conversation_id {
            *state
                .conversation_costs
                .entry(conversation_id.to_string())
                .or_insert(0.0) += cost;
        }
        if cost > 0.0 {
            state.paid_requests_today += 1;
        } else {
            state.free_requests_today += 1;
        }

        if cost > 0.01 {
            tracing::info!(provider, cost, tokens_input, tokens_output, "cost recorded");
        }

        let current_spend: f64 = state.daily_costs.values().sum();
        let percent_used = if self.config.daily_budget > 0.0 {
            100.0 * current_spend / self.config.daily_budget
        } else {
            0.0
        };
        if percent_used >= self.config.alert_at_percent {
            tracing::warn!(
                percent_used,
                current_spend,
                budget = self.config.daily_budget,
                "budget alert threshold reached"
            );
        }
    }

    pub async fn stats(&self) -> CostStats {
        let state = self.state.lock().await;
        let daily_spend: f64 = state.daily_costs.values().sum();
        let percent_used = if self.config.daily_budget > 0.0 {
            100.0 * daily_spend / self.config.daily_budget
        } else {
            0.0
        };
        CostStats {
            daily_budget: self.config.daily_budget,
            daily_spend,
            budget_remaining: self.config.daily_budget - daily_spend,
            percent_used,
            paid_requests: state.paid_requests_today,
            free_requests: state.free_requests_today,
            costs_by_provider: state.daily_costs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CostConfig {
        let mut routing = HashMap::new();
        routing.insert("simple".to_string(), vec!["groq".to_string(), "cerebras".to_string()]);
        routing.insert(
            "critical".to_string(),
            vec!["anthropic".to_string(), "openai".to_string()],
        );
        CostConfig {
            daily_budget: 1.0,
            alert_at_percent: 80.0,
            budget_exceeded_action: BudgetExceededAction::FallbackToFree,
            routing_rules: routing,
        }
    }

    #[tokio::test]
    async fn selects_first_preferred_available_provider() {
        let optimizer = CostOptimizer::new(config());
        let available = vec!["cerebras".to_string(), "groq".to_string()];
        let selected = optimizer.select_provider(Complexity::Simple, &available).await.unwrap();
        assert_eq!(selected, "groq");
    }

    #[tokio::test]
    async fn exceeded_budget_restricts_to_free_providers() {
        let optimizer = CostOptimizer::new(config());
        optimizer.record_usage("anthropic", 1_000_000, 0, None, None).await; // $3, over $1 budget
        let available = vec!["anthropic".to_string(), "openai".to_string()];
        let result = optimizer.select_provider(Complexity::Critical, &available).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_intersection_without_registered_default_fails() {
        let optimizer = CostOptimizer::new(config());
        let available = vec!["cerebras".to_string()];
        let result = optimizer.select_provider(Complexity::Critical, &available).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_intersection_with_registered_default_falls_back_to_groq() {
        let optimizer = CostOptimizer::new(config());
        let available = vec!["groq".to_string()];
        let selected = optimizer.select_provider(Complexity::Critical, &available).await.unwrap();
        assert_eq!(selected, "groq");
    }

    #[tokio::test]
    async fn record_usage_accumulates_daily_and_user_costs() {
        let optimizer = CostOptimizer::new(config());
        optimizer
            .record_usage("openai", 1_000_000, 1_000_000, Some("u1"), None)
            .await;
        let stats = optimizer.stats().await;
        assert!((stats.daily_spend - 12.50).abs() < 1e-9);
        assert_eq!(stats.paid_requests, 1);
    }

    #[tokio::test]
    async fn hard_stop_rejects_requests_once_budget_exceeded() {
        let mut cfg = config();
        cfg.budget_exceeded_action = BudgetExceededAction::HardStop;
        let optimizer = CostOptimizer::new(cfg);
        optimizer.record_usage("anthropic", 1_000_000, 0, None, None).await;
        let available = vec!["groq".to_string(), "cerebras".to_string()];
        let result = optimizer.select_provider(Complexity::Simple, &available).await;
        assert!(matches!(result, Err(Error::ProcessCompliance(_))));
    }

    #[test]
    fn calculate_cost_is_zero_for_unknown_provider() {
        let optimizer = CostOptimizer::new(config());
        assert_eq!(optimizer.calculate_cost("unknown", 1_000_000, 1_000_000), 0.0);
    }
}
