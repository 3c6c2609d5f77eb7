//! Orchestrator (C15): the single entry point, `execute()`, that ties
//! together agent loading, prompt assembly, conversation history, provider
//! selection, the fallback/retry pipeline, and the observability/audit side
//! effects every request produces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::agent::AgentLoader;
use crate::audit::{AuditRecord, AuditSink};
use crate::conversation::ConversationStore;
use crate::cost::CostOptimizer;
use crate::fallback::FallbackExecutor;
use crate::gate::ConcurrencyGate;
use crate::observability::Metrics;
use crate::pii;
use crate::pipeline::call_through_pipeline;
use crate::plan::{PlanExecutor, PromptPlan};
use crate::prompt;
use crate::providers::{CallParams, ProviderRegistry};
use crate::quality::{self, QualityConfig, Tier};
use crate::rate_limit::CombinedLimiter;
use crate::retry::RetryConfig;
use crate::throttle::AutoThrottle;
use crate::types::{
    Complexity, ExecutionMetadata, ExecutionRequest, ExecutionResponse, LlmResponse, Message,
    UserScope,
};
use crate::{Error, Result};

/// Per-agent default complexity, consulted when the caller does not pass an
/// explicit `complexity` on the request. Agents not listed here fall through
/// to keyword inference over the task text.
fn agent_default_complexity(agent_id: &str) -> Option<Complexity> {
    match agent_id {
        "analyst" => Some(Complexity::Simple),
        "dev" => Some(Complexity::Code),
        "architect" => Some(Complexity::Complex),
        "reviewer" => Some(Complexity::Medium),
        "qa" => Some(Complexity::Simple),
        "pm" => Some(Complexity::Simple),
        _ => None,
    }
}

const CRITICAL_MARKERS: &[&str] = &["critical", "production", "emergency", "urgent", "security breach"];
const COMPLEX_MARKERS: &[&str] = &[
    "architecture",
    "design",
    "system",
    "database",
    "security",
    "performance",
    "scalability",
    "review",
];
const CODE_MARKERS: &[&str] = &[
    "code",
    "function",
    "class",
    "implement",
    "bug",
    "debug",
    "refactor",
    "python",
    "javascript",
    "typescript",
    "api",
];
const MEDIUM_MARKERS: &[&str] = &["explain", "how to", "why", "compare", "recommend"];

/// Infers complexity from task keywords, most severe first, so a phrase like
/// "security breach" (critical) is not shadowed by the broader "security"
/// (complex) marker.
fn infer_complexity_from_task(task: &str) -> Complexity {
    let lower = task.to_lowercase();
    if CRITICAL_MARKERS.iter().any(|m| lower.contains(m)) {
        Complexity::Critical
    } else if COMPLEX_MARKERS.iter().any(|m| lower.contains(m)) {
        Complexity::Complex
    } else if CODE_MARKERS.iter().any(|m| lower.contains(m)) {
        Complexity::Code
    } else if MEDIUM_MARKERS.iter().any(|m| lower.contains(m)) {
        Complexity::Medium
    } else {
        Complexity::Simple
    }
}

fn determine_complexity(request: &ExecutionRequest) -> Complexity {
    request
        .complexity
        .or_else(|| agent_default_complexity(&request.agent_id))
        .unwrap_or_else(|| infer_complexity_from_task(&request.task))
}

/// Tier implied by a provider's position in its resolved fallback chain:
/// first-choice providers are Worker tier, the second is Boss, anything
/// beyond that is Ultimate.
fn tier_for_index(idx: usize) -> Tier {
    match idx {
        0 => Tier::Worker,
        1 => Tier::Boss,
        _ => Tier::Ultimate,
    }
}

pub const DEFAULT_CONVERSATION_TTL: Duration = Duration::from_secs(3600);

pub struct Orchestrator {
    agents: Arc<dyn AgentLoader>,
    conversations: Arc<dyn ConversationStore>,
    registry: Arc<ProviderRegistry>,
    gate: Arc<ConcurrencyGate>,
    limiter: Arc<CombinedLimiter>,
    retry_config: RetryConfig,
    fallback: FallbackExecutor,
    plan_executor: Option<PlanExecutor>,
    cost_optimizer: Option<Arc<CostOptimizer>>,
    throttle: Arc<AutoThrottle>,
    metrics: Arc<Metrics>,
    audit: Arc<dyn AuditSink>,
    quality_config: QualityConfig,
    conversation_ttl: Duration,
    max_history_messages: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<dyn AgentLoader>,
        conversations: Arc<dyn ConversationStore>,
        registry: Arc<ProviderRegistry>,
        gate: Arc<ConcurrencyGate>,
        limiter: Arc<CombinedLimiter>,
        retry_config: RetryConfig,
        fallback_chains: HashMap<String, Vec<String>>,
        cost_optimizer: Option<Arc<CostOptimizer>>,
        plan_executor: Option<PlanExecutor>,
        throttle: Arc<AutoThrottle>,
        metrics: Arc<Metrics>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let fallback = FallbackExecutor::new(
            (*registry).clone(),
            fallback_chains,
            gate.clone(),
            limiter.clone(),
            retry_config.clone(),
        );
        Self {
            agents,
            conversations,
            registry,
            gate,
            limiter,
            retry_config,
            fallback,
            plan_executor,
            cost_optimizer,
            throttle,
            metrics,
            audit,
            quality_config: QualityConfig::default(),
            conversation_ttl: DEFAULT_CONVERSATION_TTL,
            max_history_messages: crate::conversation::DEFAULT_MAX_MESSAGES,
        }
    }

    pub fn with_quality_config(mut self, quality_config: QualityConfig) -> Self {
        self.quality_config = quality_config;
        self
    }

    pub fn with_conversation_ttl(mut self, ttl: Duration) -> Self {
        self.conversation_ttl = ttl;
        self
    }

    pub fn with_max_history_messages(mut self, max_history_messages: usize) -> Self {
        self.max_history_messages = max_history_messages;
        self
    }

    /// Runs an optional plan instead of a single-provider call; `plan` is
    /// produced upstream (no local-optimizer planner ships in this crate —
    /// callers that want automatic plan synthesis supply one externally).
    pub async fn execute_plan(&self, request: &ExecutionRequest, plan: &PromptPlan) -> Result<ExecutionResponse> {
        let Some(executor) = &self.plan_executor else {
            return Err(Error::config("no plan executor configured"));
        };
        let agent = self.agents.load(&request.agent_id)?;
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        let response = executor.execute(plan).await?;
        self.finish_success(request, request_id, &agent, response, start, false).await
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse> {
        request.validate()?;
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("execute", %request_id, agent_id = %request.agent_id, user_id = %request.user_id);
        let _enter = span.enter();
        let start = Instant::now();

        match self.execute_inner(&request, request_id, start).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.record_failure(&request, request_id, start, &err).await;
                Err(err)
            }
        }
    }

    async fn execute_inner(&self, request: &ExecutionRequest, request_id: Uuid, start: Instant) -> Result<ExecutionResponse> {
        let agent = self.agents.load(&request.agent_id)?;
        let complexity = determine_complexity(request);

        let chain = self.resolve_chain(request, complexity).await?;

        let scope = UserScope::default();
        let history = self.conversations.load(&request.user_id, &request.agent_id).await?;
        let system_prompt = prompt::assemble(&agent, &scope, true);

        let pii_report = pii::detect(&request.task);
        if pii_report.has_pii {
            tracing::warn!(
                pii_types = ?pii_report.pii_types,
                recommendation = %pii_report.recommendation,
                "potential PII detected in task text"
            );
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history);
        messages.push(Message::user(request.task.clone()));

        let params = CallParams {
            messages: Some(messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            ..Default::default()
        };

        let (used_fallback, response) = self.call_with_escalation(&request.agent_id, &chain, params).await?;

        self.conversations
            .append_turns(
                &request.user_id,
                &request.agent_id,
                vec![Message::user(request.task.clone()), Message::assistant(response.content.clone())],
                self.max_history_messages,
                self.conversation_ttl,
            )
            .await
            .ok();

        if let Some(optimizer) = &self.cost_optimizer {
            optimizer
                .record_usage(
                    &response.provider_name,
                    response.tokens_input,
                    response.tokens_output,
                    Some(&request.user_id),
                    request.conversation_id.as_deref(),
                )
                .await;
        }

        self.finish_success(request, request_id, &agent, response, start, used_fallback).await
    }

    /// Builds the resolved provider chain for this request: the cost
    /// optimizer's pick (if enabled) first, followed by the rest of the
    /// agent's configured fallback chain in their existing order.
    async fn resolve_chain(&self, request: &ExecutionRequest, complexity: Complexity) -> Result<Vec<String>> {
        let mut chain = self.fallback.get_fallback_chain(&request.agent_id).await;

        if let Some(optimizer) = &self.cost_optimizer {
            let available: Vec<String> = self.registry.names_in_registration_order().to_vec();
            let preferred = optimizer.select_provider(complexity, &available).await?;
            chain.retain(|p| p != &preferred);
            chain.insert(0, preferred);
        }

        Ok(chain)
    }

    /// Delegates error-based rotation to [`FallbackExecutor`], then applies
    /// one quality-driven escalation step on top of a successful response:
    /// if the winning provider's tier recommends escalating and a further
    /// provider exists in the chain, that next provider is tried once more
    /// and the better-scored of the two responses is kept.
    async fn call_with_escalation(
        &self,
        agent_id: &str,
        chain: &[String],
        params: CallParams,
    ) -> Result<(bool, LlmResponse)> {
        let triggered_before = self.fallback.stats().fallback_triggered;
        let first = self.fallback.execute_with_chain(agent_id, chain, params.clone()).await?;
        let fallback_used = self.fallback.stats().fallback_triggered > triggered_before;

        let Some(idx) = chain.iter().position(|p| p == &first.provider_name) else {
            return Ok((fallback_used, first));
        };

        let tier = tier_for_index(idx);
        let report = quality::validate(&first.content, &first.finish_reason, tier, &self.quality_config);
        let Some(next_provider_name) = (report.should_escalate && idx + 1 < chain.len())
            .then(|| chain[idx + 1].clone())
        else {
            return Ok((fallback_used, first));
        };

        let Some(next_provider) = self.registry.get(&next_provider_name) else {
            return Ok((fallback_used, first));
        };

        tracing::info!(
            from = %first.provider_name,
            to = %next_provider_name,
            quality_score = report.quality_score,
            "escalating to next tier after low-quality response"
        );

        match call_through_pipeline(
            &self.gate,
            &self.limiter,
            &next_provider,
            &next_provider_name,
            params,
            &self.retry_config,
        )
        .await
        {
            Ok(escalated) => {
                let escalated_tier = tier_for_index(idx + 1);
                let escalated_report =
                    quality::validate(&escalated.content, &escalated.finish_reason, escalated_tier, &self.quality_config);
                if escalated_report.quality_score >= report.quality_score {
                    Ok((true, escalated))
                } else {
                    Ok((fallback_used, first))
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "quality escalation attempt failed, keeping original response");
                Ok((fallback_used, first))
            }
        }
    }

    async fn finish_success(
        &self,
        request: &ExecutionRequest,
        request_id: Uuid,
        agent: &crate::types::AgentRecord,
        response: LlmResponse,
        start: Instant,
        fallback_used: bool,
    ) -> Result<ExecutionResponse> {
        let latency_ms = start.elapsed().as_millis() as u64;

        self.metrics.record_request(&response.provider_name, &request.agent_id, "success");
        self.metrics
            .observe_request_duration(&response.provider_name, &request.agent_id, latency_ms as f64 / 1000.0);
        self.metrics.record_tokens(&response.provider_name, "input", response.tokens_input);
        self.metrics.record_tokens(&response.provider_name, "output", response.tokens_output);

        self.audit
            .log_execution(AuditRecord {
                request_id,
                user_id: request.user_id.clone(),
                conversation_id: request.conversation_id.clone(),
                agent_id: request.agent_id.clone(),
                provider: Some(response.provider_name.clone()),
                action: "execute".to_string(),
                status: "success".to_string(),
                latency_ms,
                tokens_input: response.tokens_input,
                tokens_output: response.tokens_output,
                error_message: None,
            })
            .await;

        Ok(ExecutionResponse {
            agent_id: request.agent_id.clone(),
            agent_name: agent.name.clone(),
            provider_name: response.provider_name.clone(),
            model_name: response.model.clone(),
            response_text: response.content,
            metadata: ExecutionMetadata {
                request_id,
                latency_ms,
                tokens_input: response.tokens_input,
                tokens_output: response.tokens_output,
                fallback_used,
                turns: 1,
            },
        })
    }

    async fn record_failure(&self, request: &ExecutionRequest, request_id: Uuid, start: Instant, err: &Error) {
        let latency_ms = start.elapsed().as_millis() as u64;
        let provider = err.provider().unwrap_or("unknown").to_string();

        self.metrics.record_request(&provider, &request.agent_id, "failed");
        self.metrics.record_failure(&provider, &request.agent_id, err.kind());
        if matches!(err, Error::RateLimit { .. }) {
            self.metrics.record_429(&provider);
            self.throttle.record_error(&provider).await;
        }

        self.audit
            .log_execution(AuditRecord {
                request_id,
                user_id: request.user_id.clone(),
                conversation_id: request.conversation_id.clone(),
                agent_id: request.agent_id.clone(),
                provider: err.provider().map(str::to_string),
                action: "execute".to_string(),
                status: "failed".to_string(),
                latency_ms,
                tokens_input: 0,
                tokens_output: 0,
                error_message: Some(err.to_string()),
            })
            .await;
    }
}
