//! Parallel variation execution with pluggable collapse strategies.
//!
//! A quantum task fans one prompt out into K independent variations,
//! bounded by a semaphore and a whole-task deadline, scores every
//! thread result, and collapses them into a single answer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::llm::LlmRequest;
use crate::domain::models::quantum::{
    CollapseStrategy, ExecutionSummary, MetricWeights, QuantumStatus, QuantumTask, ThreadMetrics,
    ThreadResult, ThreadStatus, Variation, MAX_PARALLEL_EXECUTIONS,
};
use crate::domain::models::routing::RoutingPolicy;
use crate::domain::ports::{MetricScorer, PlaceholderScorer};

use super::router::ModelRouter;

/// Latency baseline: a thread finishing at or above this wall time
/// scores zero on the latency metric.
const LATENCY_BASELINE_SECONDS: f64 = 30.0;
/// Text shorter than this is proportionally incomplete.
const COMPLETENESS_BASELINE_CHARS: f64 = 100.0;

/// Final outcome of a quantum execution.
#[derive(Debug, Clone)]
pub struct QuantumOutcome {
    pub collapsed_result: Value,
    pub final_metrics: Value,
    pub summary: ExecutionSummary,
    pub threads: Vec<ThreadResult>,
}

/// Executes quantum tasks against the router.
pub struct QuantumExecutor {
    router: Arc<ModelRouter>,
    scorer: Arc<dyn MetricScorer>,
}

impl QuantumExecutor {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self {
            router,
            scorer: Arc::new(PlaceholderScorer),
        }
    }

    /// Swap in a different accuracy metric.
    pub fn with_scorer(mut self, scorer: Arc<dyn MetricScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Run every variation, collapse, and persist outcome fields on the
    /// task. Progress advances monotonically as threads land.
    pub async fn execute(
        &self,
        task: &mut QuantumTask,
        variations: &[Variation],
    ) -> CoreResult<QuantumOutcome> {
        if variations.is_empty() {
            task.status = QuantumStatus::Failed;
            return Err(CoreError::Validation("no variations found for task".into()));
        }
        let limit = task.max_parallel_executions.min(MAX_PARALLEL_EXECUTIONS);
        if limit == 0 {
            return Err(CoreError::Validation(
                "max_parallel_executions must be positive".into(),
            ));
        }

        task.status = QuantumStatus::Running;
        task.started_at = Some(chrono::Utc::now());
        let started = std::time::Instant::now();
        info!(
            task = %task.name,
            variations = variations.len(),
            max_parallel = limit,
            "starting quantum execution"
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut units: JoinSet<ThreadResult> = JoinSet::new();
        for variation in variations {
            let permit_source = Arc::clone(&semaphore);
            let router = Arc::clone(&self.router);
            let variation = variation.clone();
            let base_prompt = task.task_description.clone();
            let task_id = task.id;
            units.spawn(async move {
                // Permit scope bounds concurrency to the task's limit.
                let _permit = permit_source.acquire_owned().await;
                run_variation(router, task_id, &variation, &base_prompt).await
            });
        }

        // Whole-task deadline over the fan-out, not per-thread.
        let total = variations.len();
        let timeout_seconds = task.timeout_seconds;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);
        let mut threads: Vec<ThreadResult> = Vec::with_capacity(total);
        let mut timed_out = false;
        loop {
            tokio::select! {
                joined = units.join_next() => match joined {
                    Some(Ok(thread)) => {
                        threads.push(thread);
                        task.advance_progress(threads.len() as f64 / total as f64);
                    }
                    Some(Err(_)) => {}
                    None => break,
                },
                () = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
            }
        }
        if timed_out {
            warn!(task = %task.name, timeout = timeout_seconds, "quantum task timed out");
            units.abort_all();
            while let Some(joined) = units.join_next().await {
                if let Ok(thread) = joined {
                    threads.push(thread);
                }
            }
            // Variations that never produced a result count as cancelled.
            for variation in variations {
                if !threads.iter().any(|t| t.variation_id == variation.id) {
                    let mut thread = ThreadResult::new(task.id, variation);
                    thread.status = ThreadStatus::Cancelled;
                    thread.error = Some(format!("cancelled after {timeout_seconds}s task timeout"));
                    threads.push(thread);
                }
            }
        }
        task.advance_progress(1.0);

        // Score every thread before collapsing.
        for thread in &mut threads {
            thread.metrics = self.score_thread(thread, &task.metric_weights);
        }

        let completed: Vec<&ThreadResult> =
            threads.iter().filter(|t| t.is_success()).collect();
        let summary = ExecutionSummary {
            total_variations: threads.len(),
            successful_executions: completed.len(),
            failed_executions: threads
                .iter()
                .filter(|t| t.status == ThreadStatus::Failed)
                .count(),
            average_execution_time: if threads.is_empty() {
                0.0
            } else {
                threads.iter().map(|t| t.execution_time_seconds).sum::<f64>()
                    / threads.len() as f64
            },
            collapse_strategy_used: task.collapse_strategy.as_str().to_string(),
        };

        if completed.is_empty() {
            task.status = QuantumStatus::Failed;
            task.completed_at = Some(chrono::Utc::now());
            task.total_execution_time = Some(started.elapsed().as_secs_f64());
            task.execution_summary = Some(summary.clone());
            return Err(CoreError::Validation("no completed results".into()));
        }

        let (collapsed, metrics) =
            collapse(task.collapse_strategy, &completed, variations);

        task.status = QuantumStatus::Completed;
        task.completed_at = Some(chrono::Utc::now());
        task.total_execution_time = Some(started.elapsed().as_secs_f64());
        task.collapsed_result = Some(collapsed.clone());
        task.final_metrics = Some(metrics.clone());
        task.execution_summary = Some(summary.clone());

        info!(
            task = %task.name,
            strategy = summary.collapse_strategy_used,
            final_score = metrics["final_score"].as_f64().unwrap_or(0.0),
            "quantum execution completed"
        );
        Ok(QuantumOutcome {
            collapsed_result: collapsed,
            final_metrics: metrics,
            summary,
            threads,
        })
    }

    fn score_thread(&self, thread: &ThreadResult, weights: &MetricWeights) -> ThreadMetrics {
        let success = if thread.is_success() { 1.0 } else { 0.0 };
        let latency_score = ((LATENCY_BASELINE_SECONDS - thread.execution_time_seconds)
            / LATENCY_BASELINE_SECONDS)
            .max(0.0);
        let completeness = match &thread.result {
            Some(Value::String(text)) => {
                (text.len() as f64 / COMPLETENESS_BASELINE_CHARS).min(1.0)
            }
            Some(Value::Object(map)) => match map.get("response") {
                Some(Value::String(text)) => {
                    (text.len() as f64 / COMPLETENESS_BASELINE_CHARS).min(1.0)
                }
                Some(other) if !other.is_null() => 1.0,
                _ => {
                    if map.is_empty() {
                        0.0
                    } else {
                        1.0
                    }
                }
            },
            Some(Value::Null) | None => 0.0,
            Some(_) => 1.0,
        };
        let accuracy = self.scorer.accuracy(thread);
        let total_score = success * weights.success
            + latency_score * weights.latency
            + completeness * weights.completeness
            + accuracy * weights.accuracy;

        ThreadMetrics {
            success,
            latency_score,
            completeness,
            accuracy,
            total_score: total_score.clamp(0.0, 1.0),
        }
    }
}

/// Run one variation to a thread result. Never panics; failures land in
/// the result's error field.
async fn run_variation(
    router: Arc<ModelRouter>,
    task_id: uuid::Uuid,
    variation: &Variation,
    base_prompt: &str,
) -> ThreadResult {
    let mut thread = ThreadResult::new(task_id, variation);
    thread.status = ThreadStatus::Running;
    thread.started_at = Some(chrono::Utc::now());
    let started = std::time::Instant::now();

    let prompt = variation.prompt_mods.apply(base_prompt);
    let mut request = LlmRequest::new(prompt);
    if let Some(model) = &variation.model {
        request.model = Some(model.clone());
    }
    if let Some(Value::Number(n)) = variation.parameters.get("temperature") {
        request.temperature = n.as_f64();
    }
    if let Some(Value::Number(n)) = variation.parameters.get("max_tokens") {
        request.max_tokens = n.as_u64();
    }

    let policy = RoutingPolicy::default();
    match router.route(request, &policy, false).await {
        Ok(response) => {
            thread.status = ThreadStatus::Completed;
            thread.model_used = Some(response.model.clone());
            thread.result = Some(json!({
                "response": response.content,
                "success": true,
                "metadata": {
                    "model_used": response.model.as_str(),
                    "tokens_used": response.tokens_used,
                    "agent_type": variation.agent_type,
                },
            }));
        }
        Err(err) => {
            thread.status = ThreadStatus::Failed;
            thread.error = Some(err.to_string());
        }
    }
    thread.completed_at = Some(chrono::Utc::now());
    thread.execution_time_seconds = started.elapsed().as_secs_f64();
    thread
}

/// Reduce completed threads to one result plus a metrics block.
fn collapse(
    strategy: CollapseStrategy,
    completed: &[&ThreadResult],
    variations: &[Variation],
) -> (Value, Value) {
    match strategy {
        CollapseStrategy::FirstSuccess => {
            let first = completed
                .iter()
                .min_by_key(|t| t.completed_at)
                .expect("collapse requires at least one completed thread");
            (
                first.result.clone().unwrap_or_default(),
                json!({
                    "final_score": first.metrics.total_score,
                    "strategy": "first_success",
                    "selected_result_id": first.id.to_string(),
                }),
            )
        }
        CollapseStrategy::BestScore => {
            let best = best_by_score(completed);
            (
                best.result.clone().unwrap_or_default(),
                json!({
                    "final_score": best.metrics.total_score,
                    "strategy": "best_score",
                    "selected_result_id": best.id.to_string(),
                    "score_distribution": completed
                        .iter()
                        .map(|t| t.metrics.total_score)
                        .collect::<Vec<_>>(),
                }),
            )
        }
        CollapseStrategy::Consensus => {
            let best = best_by_score(completed);
            let mean = completed.iter().map(|t| t.metrics.total_score).sum::<f64>()
                / completed.len() as f64;
            (
                best.result.clone().unwrap_or_default(),
                json!({
                    "final_score": mean,
                    "strategy": "consensus",
                    "selected_result_id": best.id.to_string(),
                    "consensus_confidence": (completed.len() as f64 / 10.0).min(1.0),
                }),
            )
        }
        CollapseStrategy::Combined => {
            let entries: Vec<Value> = completed
                .iter()
                .map(|t| {
                    json!({
                        "source": t.thread_name,
                        "response": t.result.as_ref().and_then(|r| r.get("response")).cloned(),
                        "score": t.metrics.total_score,
                    })
                })
                .collect();
            let mean = completed.iter().map(|t| t.metrics.total_score).sum::<f64>()
                / completed.len() as f64;
            (
                json!({
                    "combined_responses": entries,
                    "summary": format!("Combined result from {} variations", completed.len()),
                }),
                json!({
                    "final_score": mean,
                    "strategy": "combined",
                    "sources_count": completed.len(),
                }),
            )
        }
        CollapseStrategy::Weighted => {
            let weight_of = |thread: &ThreadResult| -> f64 {
                variations
                    .iter()
                    .find(|v| v.id == thread.variation_id)
                    .map_or(1.0, |v| v.weight)
            };
            let total_weight: f64 = completed.iter().map(|t| weight_of(t)).sum();
            let weighted_sum: f64 = completed
                .iter()
                .map(|t| weight_of(t) * t.metrics.total_score)
                .sum();
            let best = completed
                .iter()
                .max_by(|a, b| {
                    (weight_of(a) * a.metrics.total_score)
                        .partial_cmp(&(weight_of(b) * b.metrics.total_score))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("collapse requires at least one completed thread");
            let final_score = if total_weight > 0.0 {
                weighted_sum / total_weight
            } else {
                0.0
            };
            (
                best.result.clone().unwrap_or_default(),
                json!({
                    "final_score": final_score,
                    "strategy": "weighted",
                    "selected_result_id": best.id.to_string(),
                    "total_weight": total_weight,
                }),
            )
        }
    }
}

/// Arg-max by total score; earliest completion wins ties.
fn best_by_score<'a>(completed: &[&'a ThreadResult]) -> &'a ThreadResult {
    completed
        .iter()
        .copied()
        .max_by(|a, b| {
            a.metrics
                .total_score
                .partial_cmp(&b.metrics.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.completed_at.cmp(&a.completed_at))
        })
        .expect("collapse requires at least one completed thread")
}
