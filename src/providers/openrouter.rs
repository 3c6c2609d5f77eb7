//! OpenRouter adapter with smart upstream discovery (C2 + C12): an aggregator
//! provider that auto-discovers free models and retries under a different
//! model when the one currently selected becomes unavailable.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::openai_compatible::chat_completion_call;
use super::{CallParams, Provider};
use crate::types::{LlmResponse, TaskType};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct FreeModel {
    pub id: String,
    pub name: String,
    pub context_length: u32,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    context_length: Option<u32>,
    #[serde(default)]
    pricing: Option<ModelPricing>,
}

#[derive(Debug, Deserialize)]
struct ModelPricing {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    completion: Option<String>,
}

/// Classifies an upstream failure as "model unavailable" (worth re-picking a
/// model and retrying) versus any other error (worth propagating as-is).
/// Carried from the reference implementation's substring classifier (§1.2).
pub fn is_model_unavailable(status: Option<u16>, body: &str) -> bool {
    let lower = body.to_lowercase();
    if status == Some(404) {
        return true;
    }
    if lower.contains("no endpoints") || lower.contains("not a valid model") {
        return true;
    }
    if status == Some(429) && lower.contains("temporarily rate-limited upstream") {
        return true;
    }
    false
}

struct DiscoveryState {
    cached_models: Vec<FreeModel>,
    cache_time: Option<Instant>,
    failed_models: HashSet<String>,
}

pub struct OpenRouterAdapter {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    model: RwLock<String>,
    cache_duration: Duration,
    max_retries: u32,
    state: RwLock<DiscoveryState>,
}

impl OpenRouterAdapter {
    pub fn new(
        api_key: impl Into<String>,
        initial_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            name: "openrouter".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: api_key.into(),
            client,
            model: RwLock::new(initial_model.into()),
            cache_duration: Duration::from_secs(60 * 60),
            max_retries: 3,
            state: RwLock::new(DiscoveryState {
                cached_models: Vec::new(),
                cache_time: None,
                failed_models: HashSet::new(),
            }),
        })
    }

    pub async fn current_model(&self) -> String {
        self.model.read().await.clone()
    }

    /// Fetches (or returns cached) free-tier models: both prompt and
    /// completion unit prices must be exactly zero.
    pub async fn discover_free_models(&self, force_refresh: bool) -> Result<Vec<FreeModel>> {
        {
            let state = self.state.read().await;
            if !force_refresh {
                if let Some(cached_at) = state.cache_time {
                    if cached_at.elapsed() < self.cache_duration && !state.cached_models.is_empty() {
                        return Ok(state.cached_models.clone());
                    }
                }
            }
        }

        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let state = self.state.read().await;
            return Ok(state.cached_models.clone());
        }

        let body: ModelsResponse = response.json().await.map_err(Error::Http)?;
        let mut free_models: Vec<FreeModel> = body
            .data
            .into_iter()
            .filter(|m| {
                let pricing = m.pricing.as_ref();
                let prompt: f64 = pricing
                    .and_then(|p| p.prompt.as_deref())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                let completion: f64 = pricing
                    .and_then(|p| p.completion.as_deref())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                prompt == 0.0 && completion == 0.0
            })
            .map(|m| FreeModel {
                name: m.name.clone().unwrap_or_else(|| m.id.clone()),
                id: m.id,
                context_length: m.context_length.unwrap_or(0),
            })
            .collect();

        let mut state = self.state.write().await;
        free_models.sort_by(|a, b| {
            let a_working = !state.failed_models.contains(&a.id);
            let b_working = !state.failed_models.contains(&b.id);
            b_working
                .cmp(&a_working)
                .then(b.context_length.cmp(&a.context_length))
        });

        state.cached_models = free_models.clone();
        state.cache_time = Some(Instant::now());
        Ok(free_models)
    }

    /// Chooses the best model for `task_type`, preferring task-specific
    /// hints, else the largest context window. Excludes the failed set unless
    /// every candidate has failed, in which case the failed set is cleared.
    pub async fn pick_best(&self, models: &[FreeModel], task_type: Option<TaskType>) -> Option<String> {
        if models.is_empty() {
            return None;
        }
        let mut state = self.state.write().await;
        let mut available: Vec<&FreeModel> = models
            .iter()
            .filter(|m| !state.failed_models.contains(&m.id))
            .collect();

        if available.is_empty() {
            state.failed_models.clear();
            available = models.iter().collect();
        }

        if let Some(TaskType::Code) = task_type {
            if let Some(m) = available
                .iter()
                .find(|m| m.name.to_lowercase().contains("coder") || m.id.to_lowercase().contains("code"))
            {
                return Some(m.id.clone());
            }
        }
        if let Some(TaskType::Reasoning) = task_type {
            if let Some(m) = available.iter().find(|m| {
                let name = m.name.to_lowercase();
                let id = m.id.to_lowercase();
                name.contains("deepseek") || id.contains("r1") || id.contains("chimera")
            }) {
                return Some(m.id.clone());
            }
        }

        available.iter().max_by_key(|m| m.context_length).map(|m| m.id.clone())
    }

    pub async fn mark_model_failed(&self, model_id: &str) {
        self.state.write().await.failed_models.insert(model_id.to_string());
    }

    /// Calls the current model; on a model-unavailable signal, discovers and
    /// switches to the best alternative and retries, bounded by `max_retries`
    /// with a 1s spacing between attempts. Any other error propagates as-is.
    pub async fn call_with_auto_fallback(
        &self,
        params: CallParams,
        task_type: Option<TaskType>,
    ) -> Result<LlmResponse> {
        let mut attempts = 0;
        loop {
            let model = self.current_model().await;
            let result = chat_completion_call(
                &self.client,
                &self.base_url,
                &self.api_key,
                &self.name,
                &model,
                &params,
            )
            .await;

            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let (status, body) = match &err {
                        Error::Api { status, message, .. } => (*status, message.clone()),
                        _ => (None, String::new()),
                    };
                    if !is_model_unavailable(status, &body) {
                        return Err(err);
                    }
                    if attempts >= self.max_retries {
                        return Err(err);
                    }

                    self.mark_model_failed(&model).await;
                    let models = self.discover_free_models(false).await?;
                    if models.is_empty() {
                        return Err(err);
                    }
                    let new_model = self.pick_best(&models, task_type).await;
                    match new_model {
                        Some(new_model) if new_model != model => {
                            *self.model.write().await = new_model;
                        }
                        _ => return Err(err),
                    }

                    attempts += 1;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[async_trait]
impl Provider for OpenRouterAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, params: CallParams) -> Result<LlmResponse> {
        self.call_with_auto_fallback(params, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, context: u32) -> FreeModel {
        FreeModel {
            id: id.to_string(),
            name: id.to_string(),
            context_length: context,
        }
    }

    #[test]
    fn model_unavailable_detects_404() {
        assert!(is_model_unavailable(Some(404), "not found"));
    }

    #[test]
    fn model_unavailable_detects_no_endpoints_marker() {
        assert!(is_model_unavailable(None, "No endpoints found for this model"));
    }

    #[test]
    fn model_unavailable_ignores_ordinary_rate_limit() {
        assert!(!is_model_unavailable(Some(429), "rate limit exceeded"));
    }

    #[tokio::test]
    async fn pick_best_prefers_code_hint_for_code_task() {
        let adapter = OpenRouterAdapter::new("key", "some/model", Duration::from_secs(30)).unwrap();
        let models = vec![model("vendor/general-7b", 8000), model("vendor/coder-7b", 4000)];
        let picked = adapter.pick_best(&models, Some(TaskType::Code)).await;
        assert_eq!(picked, Some("vendor/coder-7b".to_string()));
    }

    #[tokio::test]
    async fn pick_best_falls_back_to_largest_context_without_hint() {
        let adapter = OpenRouterAdapter::new("key", "some/model", Duration::from_secs(30)).unwrap();
        let models = vec![model("vendor/small", 4000), model("vendor/big", 32000)];
        let picked = adapter.pick_best(&models, None).await;
        assert_eq!(picked, Some("vendor/big".to_string()));
    }

    #[tokio::test]
    async fn pick_best_clears_failures_when_all_models_failed() {
        let adapter = OpenRouterAdapter::new("key", "some/model", Duration::from_secs(30)).unwrap();
        let models = vec![model("vendor/only", 4000)];
        adapter.mark_model_failed("vendor/only").await;
        let picked = adapter.pick_best(&models, None).await;
        assert_eq!(picked, Some("vendor/only".to_string()));
    }
}
