//! Workflow orchestration: DAG scheduling under time and cost budgets.
//!
//! A single supervising loop owns all workflow state. Per-task work runs
//! on spawned execution units; the loop waits for any completion or a
//! one-second tick, then reconciles ready/running/terminal sets, checks
//! budgets, and cascades cancellation when a dependency fails.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::task::{Task, TaskStatus};
use crate::domain::models::workflow::{Workflow, WorkflowReport, WorkflowStatus};

use super::agent_runtime::{auto_assign_agent, AgentRuntime, WorkflowContext};

/// Grace period between requesting cancellation and force-aborting.
const STOP_GRACE: Duration = Duration::from_secs(30);
/// Supervisor tick when no unit completes.
const TICK: Duration = Duration::from_secs(1);

/// Outcome of one execution unit, merged back by the supervisor.
struct UnitResult {
    task: Task,
    error: Option<CoreError>,
}

/// Executes workflows against an agent runtime.
pub struct WorkflowOrchestrator {
    runtime: Arc<AgentRuntime>,
    /// Workflow-level decision to consult the response cache.
    use_cache: bool,
}

impl WorkflowOrchestrator {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            runtime,
            use_cache: false,
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Run the workflow to a terminal state and produce its report.
    ///
    /// The workflow is mutated in place: task states, aggregate totals,
    /// and the terminal status all land on `workflow`.
    pub async fn execute(&self, workflow: &mut Workflow) -> CoreResult<WorkflowReport> {
        if workflow.tasks.is_empty() {
            return Err(CoreError::Validation("workflow has no tasks".into()));
        }
        if workflow.agents.is_empty() {
            return Err(CoreError::Validation("workflow has no agents".into()));
        }

        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(chrono::Utc::now());
        info!(
            workflow = %workflow.name,
            tasks = workflow.tasks.len(),
            agents = workflow.agents.len(),
            "starting workflow execution"
        );

        let mut units: JoinSet<UnitResult> = JoinSet::new();
        let mut running: HashSet<Uuid> = HashSet::new();

        loop {
            // Budget check first so a breached cap stops new launches.
            self.check_budgets(workflow);

            if workflow.is_stop_requested() {
                self.stop_all(workflow, &mut units, &mut running).await;
                break;
            }

            self.cascade_cancellations(workflow);
            let ready = self.ready_tasks(workflow, &running);

            // Deadlock: nothing ready, nothing running, work remains.
            let pending_left = workflow
                .tasks
                .iter()
                .any(|t| t.status == TaskStatus::Pending);
            if ready.is_empty() && running.is_empty() {
                if pending_left {
                    let stuck: Vec<String> = workflow
                        .tasks
                        .iter()
                        .filter(|t| t.status == TaskStatus::Pending)
                        .map(|t| t.name.clone())
                        .collect();
                    error!(workflow = %workflow.name, ?stuck, "workflow deadlock detected");
                    workflow.status = WorkflowStatus::Failed;
                    workflow.ended_at = Some(chrono::Utc::now());
                    return Err(CoreError::Deadlock(format!(
                        "unsatisfiable pending tasks: {}",
                        stuck.join(", ")
                    )));
                }
                break;
            }

            for task_id in ready {
                self.launch(workflow, task_id, &mut units, &mut running)?;
            }

            // Wait-any with a tick so budget checks stay responsive.
            tokio::select! {
                joined = units.join_next(), if !units.is_empty() => {
                    if let Some(joined) = joined {
                        self.merge_unit_result(workflow, joined, &mut running);
                        // Drain any other already-finished units.
                        while let Some(extra) = units.try_join_next() {
                            self.merge_unit_result(workflow, extra, &mut running);
                        }
                    }
                }
                () = tokio::time::sleep(TICK) => {}
            }
        }

        workflow.ended_at = Some(chrono::Utc::now());
        let report = self.collect_results(workflow);
        workflow.status = if workflow.is_stop_requested() && report.completed_tasks == 0 {
            WorkflowStatus::Cancelled
        } else if workflow.failed_tasks.is_empty() && workflow.cancelled_tasks.is_empty() {
            WorkflowStatus::Completed
        } else if report.completed_tasks > 0 || !workflow.failed_tasks.is_empty() {
            // Partial failure keeps the workflow terminal but flags it.
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Cancelled
        };

        info!(
            workflow = %workflow.name,
            status = workflow.status.as_str(),
            completed = report.completed_tasks,
            failed = report.failed_tasks,
            cancelled = report.cancelled_tasks,
            cost = workflow.total_cost_usd,
            "workflow finished"
        );
        Ok(report)
    }

    /// Pending tasks whose dependencies all completed.
    fn ready_tasks(&self, workflow: &Workflow, running: &HashSet<Uuid>) -> Vec<Uuid> {
        let completed: HashSet<Uuid> = workflow.completed_tasks.iter().copied().collect();
        workflow
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && !running.contains(&t.id))
            .filter(|t| t.dependencies.iter().all(|dep| completed.contains(dep)))
            .map(|t| t.id)
            .collect()
    }

    /// Cancel pending tasks downstream of a failed or cancelled
    /// dependency when the workflow's cascade flag is set.
    fn cascade_cancellations(&self, workflow: &mut Workflow) {
        if !workflow.cascade_on_failure {
            return;
        }
        let dead: HashSet<Uuid> = workflow
            .failed_tasks
            .iter()
            .chain(workflow.cancelled_tasks.iter())
            .copied()
            .collect();
        if dead.is_empty() {
            return;
        }

        // Iterate until a fixpoint so cascades propagate transitively.
        loop {
            let mut newly_cancelled = Vec::new();
            for task in &workflow.tasks {
                if task.status == TaskStatus::Pending
                    && task.dependencies.iter().any(|dep| {
                        dead.contains(dep) || workflow.cancelled_tasks.contains(dep)
                    })
                {
                    newly_cancelled.push(task.id);
                }
            }
            if newly_cancelled.is_empty() {
                break;
            }
            for task_id in newly_cancelled {
                if let Some(task) = workflow.task_mut(task_id) {
                    task.request_cancellation();
                    if task.transition_to(TaskStatus::Cancelled).is_ok() {
                        warn!(task = %task.name, "cancelled: upstream dependency failed");
                    }
                }
                workflow.cancelled_tasks.push(task_id);
            }
        }
    }

    fn launch(
        &self,
        workflow: &mut Workflow,
        task_id: Uuid,
        units: &mut JoinSet<UnitResult>,
        running: &mut HashSet<Uuid>,
    ) -> CoreResult<()> {
        let agent_id = {
            let task = workflow
                .task(task_id)
                .ok_or_else(|| CoreError::not_found("Task", task_id.to_string()))?;
            match task.assigned_agent {
                Some(id) => id,
                None => auto_assign_agent(task, &workflow.agents).ok_or_else(|| {
                    CoreError::Validation("no agents available for assignment".into())
                })?,
            }
        };
        let agent = workflow
            .agent(agent_id)
            .ok_or_else(|| CoreError::not_found("Agent", agent_id.to_string()))?
            .clone();

        let task = workflow
            .task_mut(task_id)
            .ok_or_else(|| CoreError::not_found("Task", task_id.to_string()))?;
        task.assigned_agent = Some(agent_id);
        // The unit works on a clone; the shared cancel flag keeps the
        // supervisor's copy able to cancel it.
        let mut unit_task = task.clone();

        let context = WorkflowContext {
            workflow_id: workflow.id,
            goal: workflow.goal.clone(),
            agents: workflow
                .agents
                .iter()
                .map(|a| (a.id.to_string(), a.name.clone()))
                .collect(),
            remaining_seconds: workflow.remaining_seconds(),
            use_cache: self.use_cache,
        };

        let runtime = Arc::clone(&self.runtime);
        running.insert(task_id);
        workflow.current_tasks.insert(task_id);
        units.spawn(async move {
            let result = runtime.execute_task(&agent, &mut unit_task, &context).await;
            UnitResult {
                task: unit_task,
                error: result.err(),
            }
        });
        Ok(())
    }

    /// Merge one finished unit into workflow state. Aggregate totals are
    /// only touched here, on the supervising task.
    fn merge_unit_result(
        &self,
        workflow: &mut Workflow,
        joined: Result<UnitResult, tokio::task::JoinError>,
        running: &mut HashSet<Uuid>,
    ) {
        let unit = match joined {
            Ok(unit) => unit,
            Err(join_err) => {
                // Aborted or panicked unit; its task flags were already
                // set on the stop path, nothing to merge.
                warn!(error = %join_err, "execution unit did not return a result");
                return;
            }
        };

        let task_id = unit.task.id;
        running.remove(&task_id);
        workflow.current_tasks.remove(&task_id);

        let status = unit.task.status;
        let tokens = unit.task.tokens_used;
        let cost = unit.task.cost_usd;
        if let Some(slot) = workflow.task_mut(task_id) {
            *slot = unit.task;
        }

        match status {
            TaskStatus::Completed => {
                workflow.completed_tasks.push(task_id);
                workflow.total_tokens_used += tokens;
                workflow.total_cost_usd += cost;
            }
            TaskStatus::Cancelled => workflow.cancelled_tasks.push(task_id),
            _ => {
                if let Some(err) = &unit.error {
                    warn!(task = %task_id, error = %err, "task failed");
                }
                workflow.failed_tasks.push(task_id);
            }
        }
    }

    fn check_budgets(&self, workflow: &mut Workflow) {
        if workflow.is_stop_requested() {
            return;
        }
        if workflow.elapsed_seconds() > workflow.max_duration_seconds {
            warn!(
                workflow = %workflow.name,
                elapsed = workflow.elapsed_seconds(),
                limit = workflow.max_duration_seconds,
                "workflow exceeded time limit"
            );
            workflow.request_stop();
        } else if workflow.total_cost_usd >= workflow.max_cost_usd {
            warn!(
                workflow = %workflow.name,
                cost = workflow.total_cost_usd,
                limit = workflow.max_cost_usd,
                "workflow exceeded cost limit"
            );
            workflow.request_stop();
        }
    }

    /// Stop path: flag every non-terminal task, wait out the grace
    /// period for in-flight units, then abort what remains.
    async fn stop_all(
        &self,
        workflow: &mut Workflow,
        units: &mut JoinSet<UnitResult>,
        running: &mut HashSet<Uuid>,
    ) {
        let mut flagged = Vec::new();
        for task in &mut workflow.tasks {
            if !task.status.is_terminal() {
                task.request_cancellation();
                if task.status == TaskStatus::Pending {
                    let _ = task.transition_to(TaskStatus::Cancelled);
                    flagged.push(task.id);
                }
            }
        }
        workflow.cancelled_tasks.extend(flagged);

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while !units.is_empty() {
            tokio::select! {
                joined = units.join_next() => {
                    if let Some(joined) = joined {
                        self.merge_unit_result(workflow, joined, running);
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    warn!(remaining = units.len(), "grace period expired, aborting units");
                    units.abort_all();
                    while let Some(joined) = units.join_next().await {
                        self.merge_unit_result(workflow, joined, running);
                    }
                    break;
                }
            }
        }

        // Units that never reported land as cancelled.
        for task in &mut workflow.tasks {
            if task.status == TaskStatus::InProgress || task.status == TaskStatus::Retrying {
                let _ = task.transition_to(TaskStatus::Cancelled);
                workflow.cancelled_tasks.push(task.id);
            }
        }
        running.clear();
        workflow.current_tasks.clear();
    }

    fn collect_results(&self, workflow: &Workflow) -> WorkflowReport {
        let results: HashMap<String, serde_json::Value> = workflow
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.output.as_ref().map(|o| (t.name.clone(), o.to_value())))
            .collect();

        WorkflowReport {
            status: if workflow.failed_tasks.is_empty() && workflow.cancelled_tasks.is_empty() {
                "completed".to_string()
            } else {
                "partial_failure".to_string()
            },
            completed_tasks: workflow.completed_tasks.len(),
            failed_tasks: workflow.failed_tasks.len(),
            cancelled_tasks: workflow.cancelled_tasks.len(),
            total_tokens: workflow.total_tokens_used,
            total_cost: workflow.total_cost_usd,
            execution_time_seconds: match (workflow.started_at, workflow.ended_at) {
                (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
                _ => None,
            },
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::agent::{AgentDefinition, AgentRole};
    use crate::providers::MockProvider;
    use crate::services::agent_runtime::AgentRuntimeConfig;
    use crate::services::cache::{CacheConfig, ResponseCache};
    use crate::services::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::services::registry::{ModelRegistry, RegistryConfig};
    use crate::services::router::ModelRouter;

    fn orchestrator(provider: Arc<MockProvider>) -> WorkflowOrchestrator {
        let registry = Arc::new(
            ModelRegistry::new(vec![provider], &RegistryConfig::unchecked()).unwrap(),
        );
        let router = Arc::new(ModelRouter::new(
            registry,
            Arc::new(ResponseCache::in_process(CacheConfig::default())),
            Arc::new(RateLimiter::in_process(RateLimitConfig::default())),
        ));
        let runtime = Arc::new(AgentRuntime::new(
            router,
            AgentRuntimeConfig {
                retry_base_ms: 1,
                retry_cap_ms: 5,
            },
        ));
        WorkflowOrchestrator::new(runtime)
    }

    fn workflow_with_chain(len: usize) -> Workflow {
        let mut wf = Workflow::new("wf", "test goal")
            .with_agent(AgentDefinition::new("worker", AgentRole::Executor));
        let mut prev: Option<Uuid> = None;
        for i in 0..len {
            let mut task = Task::new(format!("t{i}"), format!("step {i}"));
            if let Some(prev_id) = prev {
                task = task.depends_on(prev_id);
            }
            prev = Some(task.id);
            wf.add_task(task).unwrap();
        }
        wf
    }

    #[tokio::test]
    async fn linear_chain_completes_in_order() {
        let provider = Arc::new(MockProvider::new("mock"));
        let orch = orchestrator(Arc::clone(&provider));
        let mut wf = workflow_with_chain(3);

        let report = orch.execute(&mut wf).await.unwrap();
        assert_eq!(report.status, "completed");
        assert_eq!(report.completed_tasks, 3);
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(report.results.len(), 3);
    }

    #[tokio::test]
    async fn empty_workflow_is_invalid() {
        let provider = Arc::new(MockProvider::new("mock"));
        let orch = orchestrator(provider);
        let mut wf = Workflow::new("empty", "goal");
        assert!(orch.execute(&mut wf).await.is_err());
    }

    #[tokio::test]
    async fn failed_dependency_cascades() {
        let provider = Arc::new(MockProvider::new("mock"));
        // First task exhausts retries, the dependents must cascade.
        for _ in 0..4 {
            provider.push_failure("permanent-ish failure");
        }
        let orch = orchestrator(Arc::clone(&provider));
        let mut wf = workflow_with_chain(3);

        let report = orch.execute(&mut wf).await.unwrap();
        assert_eq!(report.status, "partial_failure");
        assert_eq!(report.failed_tasks, 1);
        assert_eq!(report.cancelled_tasks, 2);
        assert_eq!(report.completed_tasks, 0);
    }

    #[tokio::test]
    async fn workflow_totals_sum_task_costs() {
        let provider = Arc::new(MockProvider::new("mock").with_default_cost(0.25));
        let orch = orchestrator(Arc::clone(&provider));
        let mut wf = workflow_with_chain(4);

        let report = orch.execute(&mut wf).await.unwrap();
        let task_cost_sum: f64 = wf.tasks.iter().map(|t| t.cost_usd).sum();
        assert!((report.total_cost - task_cost_sum).abs() < 1e-9);
        assert!((wf.total_cost_usd - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cost_cap_stops_remaining_tasks() {
        let provider = Arc::new(MockProvider::new("mock").with_default_cost(1.0));
        let orch = orchestrator(Arc::clone(&provider));
        let mut wf = workflow_with_chain(3);
        wf.max_cost_usd = 0.001;

        let report = orch.execute(&mut wf).await.unwrap();
        assert_eq!(report.status, "partial_failure");
        assert!(wf.total_cost_usd >= wf.max_cost_usd);
        assert_eq!(report.completed_tasks, 1);
        assert_eq!(report.cancelled_tasks, 2);
    }

    #[tokio::test]
    async fn independent_tasks_run_concurrently() {
        let provider = Arc::new(
            MockProvider::new("mock").with_response_delay(Duration::from_millis(150)),
        );
        let orch = orchestrator(Arc::clone(&provider));
        let mut wf = Workflow::new("parallel", "goal")
            .with_agent(AgentDefinition::new("worker", AgentRole::Executor));
        for i in 0..4 {
            wf.add_task(Task::new(format!("p{i}"), "independent")).unwrap();
        }

        let start = std::time::Instant::now();
        let report = orch.execute(&mut wf).await.unwrap();
        assert_eq!(report.completed_tasks, 4);
        // Four 150 ms tasks sequentially would take 600 ms.
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn cascade_disabled_leaves_dependents_pending_until_deadlock() {
        let provider = Arc::new(MockProvider::new("mock"));
        for _ in 0..4 {
            provider.push_failure("nope");
        }
        let orch = orchestrator(Arc::clone(&provider));
        let mut wf = workflow_with_chain(2).with_cascade_on_failure(false);

        let err = orch.execute(&mut wf).await.unwrap_err();
        assert!(matches!(err, CoreError::Deadlock(_)));
        assert_eq!(wf.status, WorkflowStatus::Failed);
    }
}
