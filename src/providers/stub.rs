//! Test-only provider whose behavior is scripted by callers, used by the
//! fallback executor's and orchestrator's tests to stand in for a real
//! upstream without a network call.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{CallParams, Provider};
use crate::types::LlmResponse;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubOutcome {
    Success,
    RateLimit,
    Timeout,
    ApiError,
}

/// Replays a fixed script of outcomes, one per call, holding the last entry
/// for any calls beyond the script's length.
pub struct StubProvider {
    name: String,
    script: Vec<StubOutcome>,
    calls: AtomicUsize,
    response_text: String,
}

impl StubProvider {
    pub fn new(name: impl Into<String>, script: Vec<StubOutcome>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            script,
            calls: AtomicUsize::new(0),
            response_text: "stub response".to_string(),
        })
    }

    pub fn always_succeeds(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, vec![StubOutcome::Success])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> StubOutcome {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .get(idx)
            .copied()
            .unwrap_or_else(|| *self.script.last().unwrap_or(&StubOutcome::Success))
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _params: CallParams) -> Result<LlmResponse> {
        match self.next_outcome() {
            StubOutcome::Success => Ok(LlmResponse {
                content: self.response_text.clone(),
                tokens_input: 10,
                tokens_output: 10,
                latency_ms: 1,
                model: "stub-model".to_string(),
                finish_reason: "stop".to_string(),
                provider_name: self.name.clone(),
            }),
            StubOutcome::RateLimit => Err(Error::rate_limit(self.name.clone(), None)),
            StubOutcome::Timeout => Err(Error::timeout(self.name.clone())),
            StubOutcome::ApiError => {
                Err(Error::api(self.name.clone(), Some(500), "stub failure"))
            }
        }
    }
}
