//! Workflow task domain model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};

/// Task execution status.
///
/// Transitions are monotone except `retrying -> in_progress`; the three
/// terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::{Cancelled, Completed, Failed, InProgress, Pending, Retrying};
        match (self, to) {
            (Pending, InProgress | Cancelled) => true,
            (InProgress, Completed | Failed | Cancelled | Retrying) => true,
            (Retrying, InProgress | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

/// Task output: structured JSON from the model or raw text wrapped by
/// the runtime. Kept as a sum type rather than a maybe-JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaskOutput {
    Structured(Map<String, Value>),
    Text(String),
}

impl TaskOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Structured(m) => Some(m),
            Self::Text(_) => None,
        }
    }

    /// Project into a JSON value for result maps and wire payloads.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured(m) => Value::Object(m.clone()),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

/// One unit of work inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Executing agent; auto-assigned by the orchestrator when `None`.
    pub assigned_agent: Option<Uuid>,
    /// Ids of tasks that must complete before this one becomes ready.
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub input: HashMap<String, Value>,
    /// Hint describing the shape of the expected output.
    #[serde(default)]
    pub expected_output: HashMap<String, Value>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: Option<TaskOutput>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub tokens_used: u64,
    pub cost_usd: f64,
    /// Cooperative cancellation flag, checked before and after the
    /// provider call. Not serialized; a fresh flag is created on load.
    #[serde(skip, default = "new_cancel_flag")]
    cancel_flag: Arc<AtomicBool>,
}

fn new_cancel_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

impl Task {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            assigned_agent: None,
            dependencies: Vec::new(),
            input: HashMap::new(),
            expected_output: HashMap::new(),
            success_criteria: Vec::new(),
            status: TaskStatus::Pending,
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
            retry_count: 0,
            max_retries: 3,
            tokens_used: 0,
            cost_usd: 0.0,
            cancel_flag: new_cancel_flag(),
        }
    }

    pub fn depends_on(mut self, task_id: Uuid) -> Self {
        self.dependencies.push(task_id);
        self
    }

    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.assigned_agent = Some(agent_id);
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enforce the status state machine.
    pub fn transition_to(&mut self, to: TaskStatus) -> CoreResult<()> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn request_cancellation(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Share the cancellation flag with an execution unit.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
