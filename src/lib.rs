//! # LLM Gateway
//!
//! A multi-provider LLM orchestration gateway: cost-aware routing, layered
//! rate limiting, fallback chains, and quality-gated escalation across
//! upstream chat-completion providers.
//!
//! ## Overview
//!
//! Requests enter through [`Orchestrator::execute`], which resolves an agent
//! persona, assembles a system prompt, loads rolling conversation history,
//! picks a provider chain (optionally cost-optimized), and drives the call
//! through a shared pipeline of concurrency gating, layered rate limiting,
//! and retry-with-backoff. A [`FallbackExecutor`] rotates across the chain on
//! upstream failure; the orchestrator itself escalates to the next tier on a
//! low-quality success. Multi-step workflows go through [`PlanExecutor`]
//! instead, which runs a task DAG and synthesizes the results.
//!
//! ```rust,no_run
//! use llm_gateway::retry::{retry_with_backoff, RetryConfig};
//! use llm_gateway::Error;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::new().with_max_attempts(3);
//! let value = retry_with_backoff(&config, || async {
//!     Ok::<_, Error>(42)
//! }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **error**: the crate-wide [`Error`] taxonomy and [`Result`] alias
//! - **retry**: exponential backoff with jitter, `Retry-After` aware
//! - **config**: provider, rate-limit, cost, and router configuration
//! - **types**: shared domain types (messages, agents, requests, responses)
//! - **rate_limit**: token bucket, sliding window, and their composition
//! - **throttle**: advisory auto-throttle driven by observed 429s
//! - **gate**: global concurrency admission control
//! - **providers**: the [`providers::Provider`] trait and concrete adapters
//! - **pipeline**: the shared gate/limiter/retry/call composition
//! - **fallback**: provider-chain rotation on upstream failure
//! - **quality**: response quality validation and escalation tiers
//! - **cost**: usage-aware provider selection and budget tracking
//! - **conversation**: rolling, TTL-bounded per-user/agent message history
//! - **agent**: agent persona loading
//! - **prompt**: system prompt assembly from an agent persona
//! - **plan**: multi-task DAG execution and synthesis
//! - **pii**: advisory PII detection over outbound task text
//! - **observability**: Prometheus metrics
//! - **audit**: execution audit logging
//! - **orchestrator**: the [`Orchestrator`] entry point tying it all together

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
// These modules are private (internal implementation details) unless explicitly
// re-exported through `pub use` statements below.

/// Agent persona loading.
mod agent;

/// Execution audit logging.
mod audit;

/// Provider, rate-limit, cost, and router configuration.
mod config;

/// Rolling, TTL-bounded conversation history per `(user, agent)`.
mod conversation;

/// Usage-aware provider selection and daily budget tracking.
mod cost;

/// Error types and conversions for comprehensive error handling throughout the crate.
/// Defines the `Error` enum and `Result<T>` type alias used across all public APIs.
mod error;

/// Fallback chain executor: rotates across a provider chain on upstream failure.
mod fallback;

/// Global concurrency admission control.
mod gate;

/// Prometheus metrics for requests, tokens, and rate-limit state.
mod observability;

/// The orchestrator entry point: ties agent loading, prompt assembly,
/// conversation history, provider selection, and the call pipeline together.
mod orchestrator;

/// Advisory PII detection over outbound task text.
mod pii;

/// The shared `gate ⊃ combined_limiter ⊃ retry ⊃ adapter.call` pipeline.
mod pipeline;

/// Multi-task DAG execution and synthesis.
mod plan;

/// System prompt assembly from an agent persona and user scope.
mod prompt;

/// Provider trait and concrete adapters for OpenAI-compatible, Anthropic-shaped,
/// and OpenRouter upstreams, plus a scripted test double.
mod providers;

/// Response quality validation and tier-escalation decisions.
mod quality;

/// Token bucket and sliding window rate limiters, and their composition with
/// the auto-throttle's advisory RPM ceiling.
mod rate_limit;

/// Advisory auto-throttle driven by observed upstream 429s.
mod throttle;

/// Core domain types: messages, agent records, execution requests/responses.
mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================
// These items form the public API of the crate. Everything else is internal.

/// Retry utilities with exponential backoff and jitter.
/// Made public as a module so users can access retry configuration and functions
/// for their own operations that need retry logic.
pub mod retry;

// --- Orchestrator ---

pub use orchestrator::{Orchestrator, DEFAULT_CONVERSATION_TTL};

// --- Agent Loading ---

pub use agent::{AgentLoader, StaticAgentRegistry};

// --- Audit ---

pub use audit::{AuditRecord, AuditSink, NoopAuditSink, TracingAuditSink};

// --- Configuration ---

pub use config::{
    BudgetExceededAction, CostConfig, GlobalLimitsConfig, ProviderConfig, RateLimitConfig,
    RouterConfig,
};

// --- Conversation Store ---

pub use conversation::{ConversationStore, InMemoryConversationStore, DEFAULT_MAX_MESSAGES};

// --- Cost Optimization ---

pub use cost::{default_cost_table, CostOptimizer, CostStats, ProviderCost};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Fallback Execution ---

pub use fallback::{FallbackExecutor, FallbackStats};

// --- Concurrency Gate ---

pub use gate::ConcurrencyGate;

// --- Observability ---

pub use observability::Metrics;

// --- PII Detection ---

pub use pii::{detect as detect_pii, PiiMatch, PiiReport};

// --- Plan Execution ---

pub use plan::{AgileMetadata, PlanExecutor, PlanTask, PromptPlan, Synthesizer, TaskOutput};

// --- Prompt Assembly ---

pub use prompt::assemble as assemble_prompt;

// --- Providers ---

pub use providers::{
    AnthropicAdapter, CallParams, OpenAiCompatibleAdapter, OpenRouterAdapter, Provider,
    ProviderRegistry,
};

// --- Quality Validation ---

pub use quality::{validate as validate_quality, QualityConfig, QualityReport, Tier};

// --- Rate Limiting ---

pub use rate_limit::{CombinedLimiter, SlidingWindow, TokenBucket};

// --- Auto-Throttle ---

pub use throttle::{AutoThrottle, ThrottleConfig, ThrottleStats};

// --- Core Types ---

pub use types::{
    estimate_tokens, AgentRecord, Complexity, ExecutionMetadata, ExecutionRequest,
    ExecutionResponse, LlmResponse, MenuItem, Message, MessageRole, ModelName, Persona, TaskType,
    UserScope,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use llm_gateway::prelude::*;` to get everything you need for
/// typical usage: building an [`Orchestrator`] and driving requests through it.
pub mod prelude {
    pub use crate::{
        AgentLoader, CallParams, Complexity, ConcurrencyGate, ConversationStore, CostOptimizer,
        Error, ExecutionRequest, ExecutionResponse, FallbackExecutor, Message, MessageRole,
        Orchestrator, Provider, ProviderRegistry, Result,
    };
}
