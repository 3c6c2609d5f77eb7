//! Provider interface (C1) and concrete adapters (C2).
//!
//! A provider exposes a uniform `call`/`health_check` contract; adapters map
//! that contract onto an upstream's actual wire format and normalize errors
//! into the crate-wide [`crate::Error`] taxonomy.

mod anthropic;
mod openai_compatible;
mod openrouter;
mod stub;

pub use anthropic::AnthropicAdapter;
pub use openai_compatible::OpenAiCompatibleAdapter;
pub use openrouter::{is_model_unavailable, OpenRouterAdapter};
pub use stub::{StubOutcome, StubProvider};

use crate::types::{LlmResponse, Message};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Parameters for a single chat call. Exactly one of `(system_prompt, user_prompt)`
/// or `messages` should be populated; adapters normalize to whichever shape
/// their upstream expects — for providers with a dedicated `system` slot (e.g.
/// Anthropic-shaped APIs) the system turn is partitioned out of `messages`
/// rather than sent inline.
#[derive(Debug, Clone, Default)]
pub struct CallParams {
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub messages: Option<Vec<Message>>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CallParams {
    pub fn simple(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            user_prompt: Some(user_prompt.into()),
            ..Default::default()
        }
    }
}

/// Uniform upstream contract every adapter implements. Non-retryable local
/// errors (missing API key, unknown provider type) must fail at construction,
/// not at call time — adapters accept a resolved, validated config and cannot
/// be built without one.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, params: CallParams) -> Result<LlmResponse>;

    /// Cheap liveness probe; default implementation does nothing and reports
    /// healthy, since most adapters have no separate health endpoint.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory registry of constructed providers, keyed by name. Construction
/// (reading env vars, building `reqwest::Client`s) happens once at startup;
/// the registry only holds already-valid providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registration order, used as the default fallback chain when an agent
    /// has no custom chain configured.
    pub fn names_in_registration_order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
