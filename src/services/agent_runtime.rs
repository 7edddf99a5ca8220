//! Single-task agent execution: prompt synthesis, routed generation
//! under a deadline, bounded retries, and memory upkeep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::agent::{AgentDefinition, AgentMemory, AgentRole};
use crate::domain::models::llm::{LlmRequest, LlmResponse};
use crate::domain::models::task::{Task, TaskOutput, TaskStatus};

use super::prompt::{apply_model_envelope, TemplateLibrary};
use super::router::ModelRouter;

/// Retry backoff knobs.
#[derive(Debug, Clone)]
pub struct AgentRuntimeConfig {
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: 500,
            retry_cap_ms: 30_000,
        }
    }
}

/// Shared context handed to every task execution in a workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub workflow_id: Uuid,
    pub goal: String,
    /// agent id -> display name, for prompt context.
    pub agents: HashMap<String, String>,
    /// Wall-clock budget left in the workflow; bounds the task deadline.
    pub remaining_seconds: u64,
    /// Workflow-level decision to consult the response cache.
    pub use_cache: bool,
}

/// Runs one task on behalf of one agent.
pub struct AgentRuntime {
    router: Arc<ModelRouter>,
    templates: TemplateLibrary,
    config: AgentRuntimeConfig,
    memories: Mutex<HashMap<Uuid, AgentMemory>>,
}

impl AgentRuntime {
    pub fn new(router: Arc<ModelRouter>, config: AgentRuntimeConfig) -> Self {
        Self {
            router,
            templates: TemplateLibrary::default(),
            config,
            memories: Mutex::new(HashMap::new()),
        }
    }

    /// Execute `task` with `agent`, mutating the task's state, retry
    /// count, and accounting fields in place.
    pub async fn execute_task(
        &self,
        agent: &AgentDefinition,
        task: &mut Task,
        context: &WorkflowContext,
    ) -> CoreResult<TaskOutput> {
        loop {
            if task.is_cancellation_requested() {
                task.transition_to(TaskStatus::Cancelled)?;
                task.ended_at = Some(chrono::Utc::now());
                return Err(CoreError::Cancelled);
            }

            task.transition_to(TaskStatus::InProgress)?;
            if task.started_at.is_none() {
                task.started_at = Some(chrono::Utc::now());
            }

            let request = self.build_request(agent, task, context);
            let policy = agent.routing_policy.clone().unwrap_or_default();
            let deadline = agent.timeout_seconds.min(context.remaining_seconds.max(1));

            let outcome = tokio::time::timeout(
                Duration::from_secs(deadline),
                self.router.route(request, &policy, context.use_cache),
            )
            .await;

            if task.is_cancellation_requested() {
                task.transition_to(TaskStatus::Cancelled)?;
                task.ended_at = Some(chrono::Utc::now());
                return Err(CoreError::Cancelled);
            }

            match outcome {
                Err(_elapsed) => {
                    let err = CoreError::Timeout { seconds: deadline };
                    task.error = Some(err.to_string());
                    task.transition_to(TaskStatus::Failed)?;
                    task.ended_at = Some(chrono::Utc::now());
                    return Err(err);
                }
                Ok(Ok(response)) => {
                    let output = parse_output(&response);
                    task.tokens_used += response.tokens_used;
                    task.cost_usd += response.cost_usd;
                    task.output = Some(output.clone());
                    task.transition_to(TaskStatus::Completed)?;
                    task.ended_at = Some(chrono::Utc::now());

                    self.update_memory(agent.id, task, &response).await;
                    info!(
                        agent = %agent.name,
                        task = %task.name,
                        tokens = response.tokens_used,
                        cost = response.cost_usd,
                        retries = task.retry_count,
                        "task completed"
                    );
                    return Ok(output);
                }
                Ok(Err(CoreError::Cancelled)) => {
                    task.transition_to(TaskStatus::Cancelled)?;
                    task.ended_at = Some(chrono::Utc::now());
                    return Err(CoreError::Cancelled);
                }
                Ok(Err(err)) => {
                    let retriable = matches!(err, CoreError::Upstream { .. });
                    if retriable && task.can_retry() {
                        task.retry_count += 1;
                        task.transition_to(TaskStatus::Retrying)?;
                        let backoff = self.backoff_with_jitter(task.retry_count - 1);
                        warn!(
                            agent = %agent.name,
                            task = %task.name,
                            retry = task.retry_count,
                            max = task.max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "task failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    task.error = Some(err.to_string());
                    task.transition_to(TaskStatus::Failed)?;
                    task.ended_at = Some(chrono::Utc::now());
                    return Err(err);
                }
            }
        }
    }

    fn build_request(
        &self,
        agent: &AgentDefinition,
        task: &Task,
        context: &WorkflowContext,
    ) -> LlmRequest {
        let template_name = TemplateLibrary::template_for_role(agent.role.as_str());
        let template = self.templates.get(template_name);

        let variables = HashMap::from([
            ("agent_role".to_string(), agent.role.as_str().to_string()),
            ("task_description".to_string(), task.description.clone()),
            (
                "input_data".to_string(),
                serde_json::to_string_pretty(&task.input).unwrap_or_default(),
            ),
            (
                "expected_output".to_string(),
                serde_json::to_string_pretty(&task.expected_output).unwrap_or_default(),
            ),
            (
                "success_criteria".to_string(),
                task.success_criteria
                    .iter()
                    .map(|c| format!("- {c}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            (
                "context".to_string(),
                json!({
                    "workflow_id": context.workflow_id.to_string(),
                    "workflow_goal": context.goal,
                    "agents": context.agents,
                })
                .to_string(),
            ),
        ]);

        let rendered = template.render(&variables);
        let target_model = agent.preferred_models.first();
        let envelope_target = target_model
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| role_default_model(agent.role).to_string());
        let prompt = apply_model_envelope(&rendered, &envelope_target);

        let mut request = LlmRequest::new(prompt)
            .with_max_tokens(agent.max_tokens)
            .with_temperature(agent.temperature);
        if let Some(model) = target_model {
            request.model = Some(model.clone());
        }
        request
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .retry_base_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.config.retry_cap_ms);
        // Uniform jitter in [0.5, 1.5) of the nominal delay.
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_millis((base as f64 * factor) as u64)
    }

    async fn update_memory(&self, agent_id: Uuid, task: &Task, response: &LlmResponse) {
        let mut memories = self.memories.lock().await;
        let memory = memories.entry(agent_id).or_default();
        memory.record_interaction(json!({
            "task_id": task.id.to_string(),
            "task_name": task.name,
            "success": task.status == TaskStatus::Completed,
            "tokens_used": response.tokens_used,
            "cost_usd": response.cost_usd,
            "model_used": response.model.as_str(),
        }));
    }

    /// Snapshot of one agent's memory, for inspection and tests.
    pub async fn memory_of(&self, agent_id: Uuid) -> AgentMemory {
        self.memories
            .lock()
            .await
            .get(&agent_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Default model family per role; used for envelope selection when the
/// agent has no explicit model preference.
fn role_default_model(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Researcher | AgentRole::Coder | AgentRole::Planner | AgentRole::Coordinator => {
            "openai/gpt-4.1"
        }
        AgentRole::Analyst | AgentRole::Writer => "openai/gpt-4.1-mini",
        AgentRole::Reviewer | AgentRole::Validator => "anthropic/claude-3.5-sonnet",
        AgentRole::Executor => "groq/llama-3.3-70b-versatile",
    }
}

/// Parse model output into the task output sum type: a JSON object when
/// the content parses as one, raw text otherwise.
fn parse_output(response: &LlmResponse) -> TaskOutput {
    let trimmed = response.content.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            return TaskOutput::Structured(map);
        }
    }
    TaskOutput::Text(response.content.clone())
}

/// Score how well an agent matches a task: trust, role keywords, skills,
/// and knowledge domains, in that order of weight.
pub fn score_agent_for_task(agent: &AgentDefinition, task: &Task) -> f64 {
    let haystack = format!("{} {}", task.name, task.description).to_lowercase();
    let mut score = agent.trust_level * 0.3;

    for keyword in agent.role.keywords() {
        if haystack.contains(keyword) {
            score += 0.2;
        }
    }
    for skill in &agent.skills {
        if haystack.contains(&skill.to_lowercase()) {
            score += 0.1;
        }
    }
    for domain in &agent.knowledge_domains {
        if haystack.contains(&domain.to_lowercase()) {
            score += 0.15;
        }
    }
    score
}

/// Pick the best-matching agent for an unassigned task.
pub fn auto_assign_agent(task: &Task, agents: &[AgentDefinition]) -> Option<Uuid> {
    agents
        .iter()
        .map(|agent| (agent.id, score_agent_for_task(agent, task)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use crate::services::cache::{CacheConfig, ResponseCache};
    use crate::services::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::services::registry::{ModelRegistry, RegistryConfig};

    fn runtime_with(provider: Arc<MockProvider>) -> AgentRuntime {
        let registry = Arc::new(
            ModelRegistry::new(vec![provider], &RegistryConfig::unchecked()).unwrap(),
        );
        let router = Arc::new(ModelRouter::new(
            registry,
            Arc::new(ResponseCache::in_process(CacheConfig::default())),
            Arc::new(RateLimiter::in_process(RateLimitConfig::default())),
        ));
        AgentRuntime::new(
            router,
            AgentRuntimeConfig {
                retry_base_ms: 1,
                retry_cap_ms: 10,
            },
        )
    }

    fn context() -> WorkflowContext {
        WorkflowContext {
            remaining_seconds: 60,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_records_accounting_and_memory() {
        let provider = Arc::new(MockProvider::new("mock").with_default_cost(0.01));
        let runtime = runtime_with(Arc::clone(&provider));
        let agent = AgentDefinition::new("a", AgentRole::Executor);
        let mut task = Task::new("t", "do something");

        let output = runtime
            .execute_task(&agent, &mut task, &context())
            .await
            .unwrap();
        assert!(matches!(output, TaskOutput::Text(_)));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.cost_usd > 0.0);
        assert!(task.tokens_used > 0);

        let memory = runtime.memory_of(agent.id).await;
        assert_eq!(memory.interaction_count, 1);
    }

    #[tokio::test]
    async fn json_content_parses_to_structured_output() {
        let provider = Arc::new(MockProvider::new("mock"));
        provider.push_response(r#"{"answer": 42}"#);
        let runtime = runtime_with(Arc::clone(&provider));
        let agent = AgentDefinition::new("a", AgentRole::Analyst);
        let mut task = Task::new("t", "compute");

        let output = runtime
            .execute_task(&agent, &mut task, &context())
            .await
            .unwrap();
        let map = output.as_structured().unwrap();
        assert_eq!(map["answer"], 42);
    }

    #[tokio::test]
    async fn transient_upstream_errors_are_retried() {
        let provider = Arc::new(MockProvider::new("mock"));
        provider.push_failure("blip 1");
        provider.push_failure("blip 2");
        provider.push_response("third time lucky");

        let runtime = runtime_with(Arc::clone(&provider));
        let agent = AgentDefinition::new("a", AgentRole::Executor);
        let mut task = Task::new("t", "flaky");

        let output = runtime
            .execute_task(&agent, &mut task, &context())
            .await
            .unwrap();
        assert_eq!(output.as_text(), Some("third time lucky"));
        assert_eq!(task.retry_count, 2);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn retries_exhaust_into_failure() {
        let provider = Arc::new(MockProvider::new("mock"));
        for i in 0..4 {
            provider.push_failure(format!("failure {i}"));
        }
        let runtime = runtime_with(Arc::clone(&provider));
        let agent = AgentDefinition::new("a", AgentRole::Executor);
        let mut task = Task::new("t", "doomed").with_max_retries(3);

        let err = runtime
            .execute_task(&agent, &mut task, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Upstream { .. }));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 3);
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn cancellation_before_start_short_circuits() {
        let provider = Arc::new(MockProvider::new("mock"));
        let runtime = runtime_with(Arc::clone(&provider));
        let agent = AgentDefinition::new("a", AgentRole::Executor);
        let mut task = Task::new("t", "never runs");
        task.request_cancellation();

        let err = runtime
            .execute_task(&agent, &mut task, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn deadline_marks_task_failed_without_retry() {
        let provider = Arc::new(
            MockProvider::new("mock").with_response_delay(Duration::from_secs(5)),
        );
        let runtime = runtime_with(Arc::clone(&provider));
        let agent = AgentDefinition::new("a", AgentRole::Executor).with_timeout(1);
        let mut task = Task::new("t", "slow");

        let start = std::time::Instant::now();
        let err = runtime
            .execute_task(&agent, &mut task, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 0);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn auto_assignment_prefers_matching_role() {
        let researcher = AgentDefinition::new("r", AgentRole::Researcher);
        let coder = AgentDefinition::new("c", AgentRole::Coder);
        let agents = vec![researcher.clone(), coder.clone()];

        let task = Task::new("Research market", "investigate and gather data on the market");
        assert_eq!(auto_assign_agent(&task, &agents), Some(researcher.id));

        let task = Task::new("Implement parser", "implement and program the parser script");
        assert_eq!(auto_assign_agent(&task, &agents), Some(coder.id));
    }

    #[test]
    fn skills_and_domains_raise_the_score() {
        let base = AgentDefinition::new("a", AgentRole::Executor);
        let skilled = AgentDefinition::new("b", AgentRole::Executor)
            .with_skill("kubernetes")
            .with_domain("infrastructure");

        let task = Task::new(
            "Deploy service",
            "perform the kubernetes rollout for the infrastructure team",
        );
        assert!(score_agent_for_task(&skilled, &task) > score_agent_for_task(&base, &task));
    }
}
