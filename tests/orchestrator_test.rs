//! End-to-end coverage of `Orchestrator::execute` and `Orchestrator::execute_plan`
//! through the public API only, exercising the free-tier happy path, rate-limit
//! fallback, and plan-DAG scenarios against provider test doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use llm_gateway::{
    AgentRecord, CallParams, CombinedLimiter, ConcurrencyGate, ConversationStore, CostConfig,
    CostOptimizer, Error, ExecutionRequest, InMemoryConversationStore, LlmResponse, MenuItem,
    NoopAuditSink, Orchestrator, Persona, Provider, ProviderRegistry, RateLimitConfig,
    StaticAgentRegistry,
};
use llm_gateway::{AgileMetadata, PlanExecutor, PlanTask, PromptPlan};
use llm_gateway::retry::RetryConfig;
use llm_gateway::Metrics;

fn analyst_agent() -> AgentRecord {
    AgentRecord {
        id: "analyst".to_string(),
        name: "Analyst".to_string(),
        title: "Business Analyst".to_string(),
        icon: None,
        persona: Persona {
            role: "analyst".to_string(),
            identity: "a careful analyst".to_string(),
            communication_style: "concise".to_string(),
            principles: vec!["be accurate".to_string()],
        },
        menu: Vec::<MenuItem>::new(),
        workflows: Vec::new(),
    }
}

/// Always succeeds with fixed, inspectable content.
struct FixedProvider {
    name: String,
    content: String,
}

#[async_trait]
impl Provider for FixedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _params: CallParams) -> Result<LlmResponse, Error> {
        Ok(LlmResponse {
            content: self.content.clone(),
            tokens_input: 20,
            tokens_output: 15,
            latency_ms: 5,
            model: format!("{}-model", self.name),
            finish_reason: "stop".to_string(),
            provider_name: self.name.clone(),
        })
    }
}

/// Always raises a retryable rate-limit error, counting how many times it was called.
struct AlwaysRateLimited {
    name: String,
    calls: AtomicUsize,
}

#[async_trait]
impl Provider for AlwaysRateLimited {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _params: CallParams) -> Result<LlmResponse, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::rate_limit(self.name.clone(), None))
    }
}

async fn limiter_for(names: &[&str]) -> Arc<CombinedLimiter> {
    let throttle = Arc::new(llm_gateway::AutoThrottle::new());
    let limiter = Arc::new(CombinedLimiter::new(throttle));
    for name in names {
        limiter.register_provider(*name, RateLimitConfig::new(600, 100)).await;
    }
    limiter
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(1)
        .with_initial_delay(Duration::from_millis(1))
}

#[tokio::test]
async fn happy_path_free_tier_single_provider() {
    let groq: Arc<dyn Provider> = Arc::new(FixedProvider {
        name: "groq".to_string(),
        content: "1. Catch bugs early\n2. Share knowledge\n3. Improve consistency".to_string(),
    });
    let mut registry = ProviderRegistry::new();
    registry.register(groq);
    let registry = Arc::new(registry);

    let limiter = limiter_for(&["groq"]).await;
    let gate = Arc::new(ConcurrencyGate::new(4));
    let agents = Arc::new(StaticAgentRegistry::with_agents(vec![analyst_agent()]));
    let conversations = Arc::new(InMemoryConversationStore::default());
    let throttle = Arc::new(llm_gateway::AutoThrottle::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let audit = Arc::new(NoopAuditSink);

    let cost_optimizer = Arc::new(CostOptimizer::new(CostConfig {
        daily_budget: 100.0,
        alert_at_percent: 80.0,
        budget_exceeded_action: llm_gateway::BudgetExceededAction::FallbackToFree,
        routing_rules: HashMap::new(),
    }));

    let orchestrator = Orchestrator::new(
        agents,
        conversations.clone(),
        registry,
        gate,
        limiter,
        fast_retry(),
        HashMap::new(),
        Some(cost_optimizer.clone()),
        None,
        throttle,
        metrics,
        audit,
    );

    let request = ExecutionRequest {
        agent_id: "analyst".to_string(),
        task: "List 3 benefits of code reviews".to_string(),
        user_id: "u1".to_string(),
        conversation_id: None,
        metadata: HashMap::new(),
        max_tokens: None,
        temperature: None,
        complexity: None,
    };

    let response = orchestrator.execute(request).await.unwrap();
    assert_eq!(response.provider_name, "groq");
    assert!(!response.metadata.fallback_used);

    let stats = cost_optimizer.stats().await;
    assert_eq!(stats.daily_spend, 0.0);
    assert_eq!(stats.free_requests, 1);

    let history = conversations.load("u1", "analyst").await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn rate_limited_primary_falls_back_to_secondary() {
    let p1: Arc<dyn Provider> = Arc::new(AlwaysRateLimited {
        name: "p1".to_string(),
        calls: AtomicUsize::new(0),
    });
    let p2: Arc<dyn Provider> = Arc::new(FixedProvider {
        name: "p2".to_string(),
        content: "ok".to_string(),
    });
    let mut registry = ProviderRegistry::new();
    registry.register(p1);
    registry.register(p2);
    let registry = Arc::new(registry);

    let limiter = limiter_for(&["p1", "p2"]).await;
    let gate = Arc::new(ConcurrencyGate::new(4));
    let agents = Arc::new(StaticAgentRegistry::with_agents(vec![analyst_agent_with_id("agent1")]));
    let conversations = Arc::new(InMemoryConversationStore::default());
    let throttle = Arc::new(llm_gateway::AutoThrottle::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let audit = Arc::new(NoopAuditSink);

    let mut chains = HashMap::new();
    chains.insert("agent1".to_string(), vec!["p1".to_string(), "p2".to_string()]);

    let orchestrator = Orchestrator::new(
        agents,
        conversations,
        registry,
        gate,
        limiter,
        fast_retry(),
        chains,
        None,
        None,
        throttle,
        metrics,
        audit,
    );

    let request = ExecutionRequest {
        agent_id: "agent1".to_string(),
        task: "handle this request".to_string(),
        user_id: "u1".to_string(),
        conversation_id: None,
        metadata: HashMap::new(),
        max_tokens: None,
        temperature: None,
        complexity: None,
    };

    let response = orchestrator.execute(request).await.unwrap();
    assert_eq!(response.response_text, "ok");
    assert_eq!(response.provider_name, "p2");
    assert!(response.metadata.fallback_used);
}

fn analyst_agent_with_id(id: &str) -> AgentRecord {
    AgentRecord {
        id: id.to_string(),
        ..analyst_agent()
    }
}

#[tokio::test]
async fn execute_plan_runs_dag_and_concatenates_in_task_order() {
    let a: Arc<dyn Provider> = Arc::new(FixedProvider {
        name: "stub-a".to_string(),
        content: "a".to_string(),
    });
    let b: Arc<dyn Provider> = Arc::new(FixedProvider {
        name: "stub-b".to_string(),
        content: "b".to_string(),
    });
    let mut registry = ProviderRegistry::new();
    registry.register(a);
    registry.register(b);
    let registry = Arc::new(registry);

    let limiter = limiter_for(&["stub-a", "stub-b"]).await;
    let gate = Arc::new(ConcurrencyGate::new(4));
    let agents = Arc::new(StaticAgentRegistry::with_agents(vec![analyst_agent()]));
    let conversations = Arc::new(InMemoryConversationStore::default());
    let throttle = Arc::new(llm_gateway::AutoThrottle::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let audit = Arc::new(NoopAuditSink);

    let plan_executor = PlanExecutor::new(gate.clone(), limiter.clone(), registry.clone(), fast_retry(), None);

    let orchestrator = Orchestrator::new(
        agents,
        conversations,
        registry,
        gate,
        limiter,
        fast_retry(),
        HashMap::new(),
        None,
        Some(plan_executor),
        throttle,
        metrics,
        audit,
    );

    let plan = PromptPlan {
        user_request: "build a feature".to_string(),
        normalized_problem: "build a feature".to_string(),
        agile_metadata: AgileMetadata {
            methodology: "BMAD-Agile".to_string(),
            compliance_checklist: vec!["dor".to_string()],
        },
        tasks: vec![
            PlanTask {
                id: "A".to_string(),
                role: "analyst".to_string(),
                provider_key: "stub-a".to_string(),
                expertise_context: "you are an analyst".to_string(),
                task_prompt: "analyze the request".to_string(),
                inputs: Vec::new(),
                expected_outputs: None,
                definition_of_done: None,
                blocking: true,
            },
            PlanTask {
                id: "B".to_string(),
                role: "reviewer".to_string(),
                provider_key: "stub-b".to_string(),
                expertise_context: "you are a reviewer".to_string(),
                task_prompt: "review the analysis".to_string(),
                inputs: vec!["A".to_string()],
                expected_outputs: None,
                definition_of_done: None,
                blocking: true,
            },
        ],
        aggregation_strategy: "concatenate".to_string(),
        post_processing_prompt: None,
    };

    let request = ExecutionRequest {
        agent_id: "analyst".to_string(),
        task: "build a feature".to_string(),
        user_id: "u1".to_string(),
        conversation_id: None,
        metadata: HashMap::new(),
        max_tokens: None,
        temperature: None,
        complexity: None,
    };

    let response = orchestrator.execute_plan(&request, &plan).await.unwrap();
    assert!(response.response_text.contains("Task A"));
    assert!(response.response_text.contains("Task B"));
    assert!(response.response_text.find("Task A").unwrap() < response.response_text.find("Task B").unwrap());
}
