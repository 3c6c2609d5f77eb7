//! Plan executor (C16): optional multi-task DAG of specialist sub-calls with
//! dependency resolution and an optional local synthesis step.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::gate::ConcurrencyGate;
use crate::pipeline::call_through_pipeline;
use crate::providers::{CallParams, ProviderRegistry};
use crate::rate_limit::CombinedLimiter;
use crate::retry::RetryConfig;
use crate::types::LlmResponse;
use crate::{Error, Result};

/// Advisory ceiling passed to the synthesizer so it can truncate per-task
/// outputs before composing its own prompt.
pub const SYNTHESIS_PROMPT_BUDGET_TOKENS: u32 = 4_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileMetadata {
    pub methodology: String,
    pub compliance_checklist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlanTask {
    pub id: String,
    pub role: String,
    pub provider_key: String,
    pub expertise_context: String,
    pub task_prompt: String,
    pub inputs: Vec<String>,
    pub expected_outputs: Option<String>,
    pub definition_of_done: Option<String>,
    pub blocking: bool,
}

#[derive(Debug, Clone)]
pub struct PromptPlan {
    pub user_request: String,
    pub normalized_problem: String,
    pub agile_metadata: AgileMetadata,
    pub tasks: Vec<PlanTask>,
    pub aggregation_strategy: String,
    pub post_processing_prompt: Option<String>,
}

/// Per-task output carried into the optional synthesis step.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub task_id: String,
    pub provider: String,
    pub content: String,
}

/// Optional local synthesis step: given the ordered per-task outputs and the
/// plan's post-processing prompt, produces the final answer. Ships behind a
/// trait since no concrete synthesizer model is mandated by the spec; callers
/// wire in whichever provider should do the synthesis.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        outputs: &[TaskOutput],
        post_processing_prompt: Option<&str>,
        budget_tokens: u32,
    ) -> Result<LlmResponse>;
}

/// Validates plan-level invariants that must hold before any task executes.
pub fn validate(plan: &PromptPlan, registry: &ProviderRegistry) -> Result<()> {
    if plan.agile_metadata.methodology != "BMAD-Agile" {
        return Err(Error::process_compliance(format!(
            "plan methodology must be BMAD-Agile, got {:?}",
            plan.agile_metadata.methodology
        )));
    }
    if plan.agile_metadata.compliance_checklist.is_empty() {
        return Err(Error::process_compliance(
            "plan compliance_checklist must be non-empty",
        ));
    }

    let mut seen_ids = HashSet::new();
    for task in &plan.tasks {
        if task.id.trim().is_empty() {
            return Err(Error::process_compliance("task id must be non-empty"));
        }
        if !seen_ids.insert(task.id.as_str()) {
            return Err(Error::process_compliance(format!(
                "duplicate task id: {}",
                task.id
            )));
        }
        if !registry.contains(&task.provider_key) {
            return Err(Error::process_compliance(format!(
                "task {} references unregistered provider {}",
                task.id, task.provider_key
            )));
        }
        if task.inputs.iter().any(|dep| dep == &task.id) {
            return Err(Error::process_compliance(format!(
                "task {} cannot depend on itself",
                task.id
            )));
        }
    }

    for task in &plan.tasks {
        for dep in &task.inputs {
            if !seen_ids.contains(dep.as_str()) {
                return Err(Error::process_compliance(format!(
                    "task {} depends on unknown task {}",
                    task.id, dep
                )));
            }
        }
    }

    check_dag(plan)?;
    Ok(())
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Mark {
    Grey,
    Black,
}

fn check_dag(plan: &PromptPlan) -> Result<()> {
    let by_id: HashMap<&str, &PlanTask> = plan.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a PlanTask>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Black) => return Ok(()),
            Some(Mark::Grey) => {
                return Err(Error::process_compliance(format!(
                    "dependency cycle detected at task {id}"
                )))
            }
            None => {}
        }
        marks.insert(id, Mark::Grey);
        if let Some(task) = by_id.get(id) {
            for dep in &task.inputs {
                visit(dep, by_id, marks)?;
            }
        }
        marks.insert(id, Mark::Black);
        Ok(())
    }

    for task in &plan.tasks {
        visit(&task.id, &by_id, &mut marks)?;
    }
    Ok(())
}

pub struct PlanExecutor {
    gate: Arc<ConcurrencyGate>,
    limiter: Arc<CombinedLimiter>,
    registry: Arc<ProviderRegistry>,
    retry_config: RetryConfig,
    synthesizer: Option<Arc<dyn Synthesizer>>,
}

impl PlanExecutor {
    pub fn new(
        gate: Arc<ConcurrencyGate>,
        limiter: Arc<CombinedLimiter>,
        registry: Arc<ProviderRegistry>,
        retry_config: RetryConfig,
        synthesizer: Option<Arc<dyn Synthesizer>>,
    ) -> Self {
        Self {
            gate,
            limiter,
            registry,
            retry_config,
            synthesizer,
        }
    }

    /// Runs `plan.tasks` to completion pass by pass, each pass dispatching all
    /// currently-ready tasks concurrently, then synthesizes (or concatenates)
    /// the outputs into a single response.
    pub async fn execute(&self, plan: &PromptPlan) -> Result<LlmResponse> {
        validate(plan, &self.registry)?;

        let mut results: HashMap<String, LlmResponse> = HashMap::new();
        let mut remaining: Vec<&PlanTask> = plan.tasks.iter().collect();

        while !remaining.is_empty() {
            let (ready, not_ready): (Vec<&PlanTask>, Vec<&PlanTask>) = remaining
                .into_iter()
                .partition(|task| task.inputs.iter().all(|dep| results.contains_key(dep)));

            if ready.is_empty() {
                return Err(Error::process_compliance(
                    "plan execution made no progress: remaining tasks have unmet dependencies",
                ));
            }

            let futures = ready.iter().map(|task| self.run_task(task, &results));
            let outcomes = join_all(futures).await;

            for outcome in outcomes {
                let (id, response) = outcome?;
                results.insert(id, response);
            }

            remaining = not_ready;
        }

        self.finalize(plan, &results).await
    }

    async fn run_task(
        &self,
        task: &PlanTask,
        results: &HashMap<String, LlmResponse>,
    ) -> Result<(String, LlmResponse)> {
        let provider = self
            .registry
            .get(&task.provider_key)
            .ok_or_else(|| Error::config(format!("provider not registered: {}", task.provider_key)))?;

        let mut user_prompt = task.task_prompt.clone();
        for dep in &task.inputs {
            if let Some(dep_response) = results.get(dep) {
                user_prompt.push_str(&format!("\n\nContext from {dep}: {}", dep_response.content));
            }
        }

        let params = CallParams::simple(task.expertise_context.clone(), user_prompt);
        let response = call_through_pipeline(
            &self.gate,
            &self.limiter,
            &provider,
            &task.provider_key,
            params,
            &self.retry_config,
        )
        .await?;

        Ok((task.id.clone(), response))
    }

    async fn finalize(
        &self,
        plan: &PromptPlan,
        results: &HashMap<String, LlmResponse>,
    ) -> Result<LlmResponse> {
        let ordered_outputs: Vec<TaskOutput> = plan
            .tasks
            .iter()
            .filter_map(|task| {
                results.get(&task.id).map(|r| TaskOutput {
                    task_id: task.id.clone(),
                    provider: r.provider_name.clone(),
                    content: r.content.clone(),
                })
            })
            .collect();

        let tokens_input: u32 = results.values().map(|r| r.tokens_input).sum();
        let tokens_output: u32 = results.values().map(|r| r.tokens_output).sum();
        let latency_ms: u64 = results.values().map(|r| r.latency_ms).sum();

        let last_task = plan.tasks.last().ok_or_else(|| {
            Error::process_compliance("plan has no tasks to finalize".to_string())
        })?;
        let last_response = results.get(&last_task.id).ok_or_else(|| {
            Error::process_compliance(format!("missing result for final task {}", last_task.id))
        })?;

        if let Some(synthesizer) = &self.synthesizer {
            match synthesizer
                .synthesize(
                    &ordered_outputs,
                    plan.post_processing_prompt.as_deref(),
                    SYNTHESIS_PROMPT_BUDGET_TOKENS,
                )
                .await
            {
                Ok(mut synthesized) => {
                    synthesized.tokens_input += tokens_input;
                    synthesized.tokens_output += tokens_output;
                    synthesized.latency_ms += latency_ms;
                    return Ok(synthesized);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "plan synthesis failed, falling back to verbatim concatenation");
                }
            }
        }

        let content = ordered_outputs
            .iter()
            .map(|o| format!("Task {} ({}) => {}", o.task_id, o.provider, o.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(LlmResponse {
            content,
            tokens_input,
            tokens_output,
            latency_ms,
            model: last_response.model.clone(),
            finish_reason: last_response.finish_reason.clone(),
            provider_name: last_response.provider_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::providers::{Provider, StubOutcome, StubProvider};
    use crate::throttle::AutoThrottle;

    fn sample_plan(task_b_inputs: Vec<String>) -> PromptPlan {
        PromptPlan {
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
                    inputs: task_b_inputs,
                    expected_outputs: None,
                    definition_of_done: None,
                    blocking: true,
                },
            ],
            aggregation_strategy: "concatenate".to_string(),
            post_processing_prompt: None,
        }
    }

    async fn executor_with(registry: ProviderRegistry) -> PlanExecutor {
        let throttle = Arc::new(AutoThrottle::new());
        let limiter = Arc::new(CombinedLimiter::new(throttle));
        limiter.register_provider("stub-a", RateLimitConfig::new(600, 100)).await;
        limiter.register_provider("stub-b", RateLimitConfig::new(600, 100)).await;
        PlanExecutor::new(
            Arc::new(ConcurrencyGate::new(4)),
            limiter,
            Arc::new(registry),
            RetryConfig::new().with_max_attempts(1),
            None,
        )
    }

    fn registry_with(a_text: &str, b_text: &str) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        let a: Arc<dyn Provider> = StubProvider::new("stub-a", vec![StubOutcome::Success]);
        let b: Arc<dyn Provider> = StubProvider::new("stub-b", vec![StubOutcome::Success]);
        let _ = (a_text, b_text);
        registry.register(a);
        registry.register(b);
        registry
    }

    #[test]
    fn validate_rejects_non_bmad_methodology() {
        let mut plan = sample_plan(vec!["A".to_string()]);
        plan.agile_metadata.methodology = "waterfall".to_string();
        let registry = registry_with("a", "b");
        assert!(validate(&plan, &registry).is_err());
    }

    #[test]
    fn validate_rejects_self_dependency() {
        let mut plan = sample_plan(vec!["A".to_string()]);
        plan.tasks[0].inputs.push("A".to_string());
        let registry = registry_with("a", "b");
        assert!(validate(&plan, &registry).is_err());
    }

    #[test]
    fn validate_rejects_cycle() {
        let mut plan = sample_plan(vec!["A".to_string()]);
        plan.tasks[0].inputs.push("B".to_string());
        let registry = registry_with("a", "b");
        assert!(validate(&plan, &registry).is_err());
    }

    #[test]
    fn validate_rejects_unregistered_provider() {
        let mut plan = sample_plan(vec!["A".to_string()]);
        plan.tasks[1].provider_key = "missing".to_string();
        let registry = registry_with("a", "b");
        assert!(validate(&plan, &registry).is_err());
    }

    #[tokio::test]
    async fn executes_dependent_tasks_in_order_and_concatenates_output() {
        let plan = sample_plan(vec!["A".to_string()]);
        let registry = registry_with("a", "b");
        let executor = executor_with(registry).await;

        let response = executor.execute(&plan).await.unwrap();
        assert!(response.content.contains("Task A"));
        assert!(response.content.contains("Task B"));
    }

    #[tokio::test]
    async fn independent_tasks_both_execute_without_dependency() {
        let plan = sample_plan(Vec::new());
        let registry = registry_with("a", "b");
        let executor = executor_with(registry).await;

        let response = executor.execute(&plan).await.unwrap();
        assert!(response.content.contains("Task A"));
        assert!(response.content.contains("Task B"));
    }
}
