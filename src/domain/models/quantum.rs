//! Quantum task domain model: K parallel variations of one prompt,
//! collapsed into a single result.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::model_spec::ModelId;

/// Hard ceiling on parallel executions, regardless of configuration.
pub const MAX_PARALLEL_EXECUTIONS: usize = 20;

/// How K thread results are reduced to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollapseStrategy {
    /// Earliest-completed successful result.
    FirstSuccess,
    /// Highest total score, earliest completion breaking ties.
    #[default]
    BestScore,
    /// Best result, reported with the mean score of all threads.
    Consensus,
    /// All responses merged into one document.
    Combined,
    /// Variation-weight-scaled selection and scoring.
    Weighted,
}

impl CollapseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstSuccess => "first_success",
            Self::BestScore => "best_score",
            Self::Consensus => "consensus",
            Self::Combined => "combined",
            Self::Weighted => "weighted",
        }
    }
}

/// Weights over the four per-thread metrics. Defaults mirror the
/// scoring pass: success 0.3, latency 0.2, completeness 0.3, accuracy 0.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWeights {
    pub success: f64,
    pub latency: f64,
    pub completeness: f64,
    pub accuracy: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            success: 0.3,
            latency: 0.2,
            completeness: 0.3,
            accuracy: 0.2,
        }
    }
}

/// Prompt perturbations applied by one variation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptMods {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    /// Literal `old -> new` replacements applied to the prompt body.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub replacements: HashMap<String, String>,
    /// Style tag appended as a rendering instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl PromptMods {
    /// Apply prefix, suffix, replacements, and style to a base prompt.
    pub fn apply(&self, base: &str) -> String {
        let mut prompt = base.to_string();
        if let Some(prefix) = &self.prefix {
            prompt = format!("{prefix}\n\n{prompt}");
        }
        if let Some(suffix) = &self.suffix {
            prompt = format!("{prompt}\n\n{suffix}");
        }
        for (old, new) in &self.replacements {
            prompt = prompt.replace(old, new);
        }
        if let Some(style) = &self.style {
            prompt = format!("{prompt}\n\nPlease respond in a {style} style.");
        }
        prompt
    }
}

/// One parameterized perturbation of the quantum task's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variation {
    pub id: Uuid,
    pub task_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Agent role override, e.g. "analyst".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelId>,
    #[serde(default)]
    pub prompt_mods: PromptMods,
    /// Generation parameter overrides (temperature, max_tokens, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,
    /// Positive weight used by the `weighted` collapse strategy.
    pub weight: f64,
}

impl Variation {
    pub fn new(task_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            name: name.into(),
            description: String::new(),
            agent_type: None,
            model: None,
            prompt_mods: PromptMods::default(),
            parameters: HashMap::new(),
            weight: 1.0,
        }
    }

    pub fn with_model(mut self, model: ModelId) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_prompt_mods(mut self, mods: PromptMods) -> Self {
        self.prompt_mods = mods;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantumStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl QuantumStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Scores computed for one thread result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadMetrics {
    pub success: f64,
    pub latency_score: f64,
    pub completeness: f64,
    pub accuracy: f64,
    pub total_score: f64,
}

/// One variation's outcome within a quantum task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub variation_id: Uuid,
    pub thread_name: String,
    pub status: ThreadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub metrics: ThreadMetrics,
    pub execution_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<ModelId>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ThreadResult {
    pub fn new(task_id: Uuid, variation: &Variation) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            variation_id: variation.id,
            thread_name: format!("{}-{}", variation.name, variation.id),
            status: ThreadStatus::Pending,
            result: None,
            metrics: ThreadMetrics::default(),
            execution_time_seconds: 0.0,
            error: None,
            model_used: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ThreadStatus::Completed && self.error.is_none() && self.result.is_some()
    }
}

/// Summary block persisted with the collapsed result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_variations: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub average_execution_time: f64,
    pub collapse_strategy_used: String,
}

/// A task run as K parallel independent variations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantumTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The prompt every variation perturbs.
    pub task_description: String,
    pub collapse_strategy: CollapseStrategy,
    #[serde(default)]
    pub metric_weights: MetricWeights,
    pub max_parallel_executions: usize,
    pub timeout_seconds: u64,
    pub status: QuantumStatus,
    /// Non-decreasing fraction of threads that reached a terminal state.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_summary: Option<ExecutionSummary>,
    pub total_execution_time: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QuantumTask {
    pub fn new(user_id: Uuid, name: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            description: String::new(),
            task_description: task_description.into(),
            collapse_strategy: CollapseStrategy::default(),
            metric_weights: MetricWeights::default(),
            max_parallel_executions: 5,
            timeout_seconds: 300,
            status: QuantumStatus::Pending,
            progress: 0.0,
            collapsed_result: None,
            final_metrics: None,
            execution_summary: None,
            total_execution_time: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_strategy(mut self, strategy: CollapseStrategy) -> Self {
        self.collapse_strategy = strategy;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel_executions = max_parallel.min(MAX_PARALLEL_EXECUTIONS);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Progress only moves forward.
    pub fn advance_progress(&mut self, progress: f64) {
        if progress > self.progress {
            self.progress = progress.min(1.0);
        }
    }
}
