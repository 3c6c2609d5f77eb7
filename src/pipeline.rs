//! The shared call pipeline: `gate ⊃ combined_limiter ⊃ retry ⊃ adapter.call`,
//! used identically by a single-provider execute() and by each plan task (C16).

use std::sync::Arc;
use std::time::Duration;

use crate::gate::ConcurrencyGate;
use crate::providers::{CallParams, Provider};
use crate::rate_limit::CombinedLimiter;
use crate::retry::{retry_with_backoff_and_retry_after, RetryConfig};
use crate::types::LlmResponse;
use crate::{Error, Result};

/// Matches `GlobalLimitsConfig::default().default_timeout`; a `reqwest::Client`
/// timeout only bounds one HTTP round-trip, not retries the HTTP stack itself
/// performs underneath it, so each attempt also gets this outer deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Acquires the global concurrency permit once per call, then retries the
/// rate-limiter-gated adapter call per `retry_config`. The permit is held for
/// the whole retry sequence, matching §4.6's "wraps every upstream call."
pub async fn call_through_pipeline(
    gate: &ConcurrencyGate,
    limiter: &CombinedLimiter,
    provider: &Arc<dyn Provider>,
    provider_name: &str,
    params: CallParams,
    retry_config: &RetryConfig,
) -> Result<LlmResponse> {
    call_through_pipeline_with_timeout(
        gate,
        limiter,
        provider,
        provider_name,
        params,
        retry_config,
        DEFAULT_CALL_TIMEOUT,
    )
    .await
}

/// Same as [`call_through_pipeline`] but with an explicit per-attempt timeout,
/// for callers whose `GlobalLimitsConfig::default_timeout` differs from the default.
pub async fn call_through_pipeline_with_timeout(
    gate: &ConcurrencyGate,
    limiter: &CombinedLimiter,
    provider: &Arc<dyn Provider>,
    provider_name: &str,
    params: CallParams,
    retry_config: &RetryConfig,
    call_timeout: Duration,
) -> Result<LlmResponse> {
    let _permit = gate.acquire().await;
    retry_with_backoff_and_retry_after(retry_config, || {
        let params = params.clone();
        async move {
            limiter.acquire(provider_name).await?;
            match tokio::time::timeout(call_timeout, provider.call(params)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(provider_name.to_string())),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::providers::{StubOutcome, StubProvider};
    use crate::throttle::AutoThrottle;

    #[tokio::test]
    async fn pipeline_retries_rate_limit_then_succeeds() {
        let gate = ConcurrencyGate::new(4);
        let throttle = Arc::new(AutoThrottle::new());
        let limiter = CombinedLimiter::new(throttle);
        limiter.register_provider("stub", RateLimitConfig::new(60, 10)).await;

        let provider: Arc<dyn Provider> =
            StubProvider::new("stub", vec![StubOutcome::RateLimit, StubOutcome::Success]);
        let retry_config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(std::time::Duration::from_millis(5));

        let result = call_through_pipeline(
            &gate,
            &limiter,
            &provider,
            "stub",
            CallParams::simple("sys", "hi"),
            &retry_config,
        )
        .await;

        assert!(result.is_ok());
    }
}
