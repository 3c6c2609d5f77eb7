//! Fallback chain executor (C9): tries a provider chain in order, returning
//! the first success and rotating past retryable failures. Each attempt in
//! the chain runs through the same `gate ⊃ limiter ⊃ retry ⊃ adapter.call`
//! pipeline as a standalone single-provider call — the chain only rotates
//! once that whole pipeline gives up on a provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::gate::ConcurrencyGate;
use crate::pipeline::call_through_pipeline;
use crate::providers::{CallParams, ProviderRegistry};
use crate::rate_limit::CombinedLimiter;
use crate::retry::RetryConfig;
use crate::types::LlmResponse;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct FallbackStats {
    pub total_calls: u64,
    pub fallback_triggered: u64,
    pub fallback_success: u64,
    pub all_failed: u64,
}

impl FallbackStats {
    pub fn fallback_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            100.0 * self.fallback_triggered as f64 / self.total_calls as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.fallback_triggered == 0 {
            0.0
        } else {
            100.0 * self.fallback_success as f64 / self.fallback_triggered as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    total_calls: AtomicU64,
    fallback_triggered: AtomicU64,
    fallback_success: AtomicU64,
    all_failed: AtomicU64,
}

pub struct FallbackExecutor {
    registry: ProviderRegistry,
    fallback_chains: RwLock<HashMap<String, Vec<String>>>,
    counters: Counters,
    gate: Arc<ConcurrencyGate>,
    limiter: Arc<CombinedLimiter>,
    retry_config: RetryConfig,
}

impl FallbackExecutor {
    pub fn new(
        registry: ProviderRegistry,
        fallback_chains: HashMap<String, Vec<String>>,
        gate: Arc<ConcurrencyGate>,
        limiter: Arc<CombinedLimiter>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            registry,
            fallback_chains: RwLock::new(fallback_chains),
            counters: Counters::default(),
            gate,
            limiter,
            retry_config,
        }
    }

    /// `chain(agent) = custom_chains[agent] ∩ registered`, else all registered
    /// providers in registration order. If the custom chain has no registered
    /// members at all, also falls back to the full registration order.
    pub async fn get_fallback_chain(&self, agent_id: &str) -> Vec<String> {
        let chains = self.fallback_chains.read().await;
        let default_chain: Vec<String> = self.registry.names_in_registration_order().to_vec();

        let Some(custom) = chains.get(agent_id) else {
            return default_chain;
        };

        let available: Vec<String> = custom
            .iter()
            .filter(|name| self.registry.contains(name))
            .cloned()
            .collect();

        if available.is_empty() {
            default_chain
        } else {
            available
        }
    }

    /// Tries each provider in this agent's resolved chain in order. See
    /// [`Self::execute_with_chain`] for the iteration behavior.
    pub async fn execute_with_fallback(
        &self,
        agent_id: &str,
        params: CallParams,
    ) -> Result<LlmResponse> {
        let chain = self.get_fallback_chain(agent_id).await;
        self.execute_with_chain(agent_id, &chain, params).await
    }

    /// Tries each provider in the caller-supplied `chain` in order, ignoring
    /// this executor's own configured chain for `agent_id` (used by the
    /// orchestrator to try its cost-optimizer-reordered chain). Returns the
    /// first success. Retryable upstream failures (rate limit, timeout, API
    /// error) continue to the next provider; an exhausted chain raises
    /// `AllProvidersFailed`. Unexpected adapter panics are not caught here —
    /// they are a construction-time bug, not a runtime fallback condition.
    pub async fn execute_with_chain(
        &self,
        agent_id: &str,
        chain: &[String],
        params: CallParams,
    ) -> Result<LlmResponse> {
        self.counters.total_calls.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        let chain = chain.to_vec();
        let mut errors: HashMap<String, String> = HashMap::new();

        for (idx, provider_name) in chain.iter().enumerate() {
            let Some(provider) = self.registry.get(provider_name) else {
                tracing::warn!(provider = %provider_name, "provider not found in registry, skipping");
                continue;
            };

            match call_through_pipeline(
                &self.gate,
                &self.limiter,
                &provider,
                provider_name,
                params.clone(),
                &self.retry_config,
            )
            .await
            {
                Ok(response) => {
                    if idx > 0 {
                        self.counters.fallback_triggered.fetch_add(1, Ordering::SeqCst);
                        self.counters.fallback_success.fetch_add(1, Ordering::SeqCst);
                        tracing::info!(
                            agent_id,
                            provider = %provider_name,
                            failures = idx,
                            "fallback succeeded"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    errors.insert(provider_name.clone(), err.to_string());
                    if idx + 1 < chain.len() {
                        tracing::warn!(
                            agent_id,
                            provider = %provider_name,
                            next = %chain[idx + 1],
                            error = %err,
                            "provider failed, trying fallback"
                        );
                    } else {
                        tracing::error!(
                            agent_id,
                            provider = %provider_name,
                            error = %err,
                            "provider failed, no more fallbacks available"
                        );
                    }
                }
            }
        }

        self.counters.all_failed.fetch_add(1, Ordering::SeqCst);
        if chain.len() > 1 {
            self.counters.fallback_triggered.fetch_add(1, Ordering::SeqCst);
        }
        tracing::error!(
            agent_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chain_len = chain.len(),
            "all providers failed"
        );
        Err(Error::AllProvidersFailed {
            agent_id: agent_id.to_string(),
            chain,
            errors_by_provider: errors,
        })
    }

    pub fn stats(&self) -> FallbackStats {
        FallbackStats {
            total_calls: self.counters.total_calls.load(Ordering::SeqCst),
            fallback_triggered: self.counters.fallback_triggered.load(Ordering::SeqCst),
            fallback_success: self.counters.fallback_success.load(Ordering::SeqCst),
            all_failed: self.counters.all_failed.load(Ordering::SeqCst),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.total_calls.store(0, Ordering::SeqCst);
        self.counters.fallback_triggered.store(0, Ordering::SeqCst);
        self.counters.fallback_success.store(0, Ordering::SeqCst);
        self.counters.all_failed.store(0, Ordering::SeqCst);
    }
}
