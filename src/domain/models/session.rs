//! Session-layer domain models for the MCP and A2A protocols.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// MCP protocol version this server speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
/// A2A protocol version this server speaks.
pub const A2A_PROTOCOL_VERSION: &str = "1.0.0";

/// Where a connection came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkOrigin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Client identification sent during MCP initialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// A client-to-server MCP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSession {
    pub session_id: String,
    pub protocol_version: String,
    pub client_info: ClientInfo,
    #[serde(default)]
    pub client_capabilities: HashMap<String, Value>,
    #[serde(default)]
    pub server_capabilities: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub origin: NetworkOrigin,
}

impl McpSession {
    pub fn new(
        client_info: ClientInfo,
        client_capabilities: HashMap<String, Value>,
        server_capabilities: HashMap<String, Value>,
        expires_in_minutes: i64,
        origin: NetworkOrigin,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            client_info,
            client_capabilities,
            server_capabilities,
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::minutes(expires_in_minutes),
            is_active: true,
            origin,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// A peer-agent A2A session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aSession {
    pub session_id: String,
    pub agent_id: String,
    pub agent_name: String,
    #[serde(default)]
    pub agent_capabilities: Vec<String>,
    pub protocol_version: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Whether a live stream channel is currently bound.
    pub has_stream: bool,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default)]
    pub origin: NetworkOrigin,
}

impl A2aSession {
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        agent_capabilities: Vec<String>,
        expires_in_hours: i64,
        public_key: Option<String>,
        origin: NetworkOrigin,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            agent_capabilities,
            protocol_version: A2A_PROTOCOL_VERSION.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::hours(expires_in_hours),
            has_stream: false,
            is_active: true,
            public_key,
            origin,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Outcome of an A2A skill negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Failed,
}

/// Persisted record of one A2A negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Negotiation {
    pub negotiation_id: String,
    pub session_id: String,
    pub requested_skills: Vec<String>,
    /// Skills the server can actually provide, after intersection.
    pub available_skills: Vec<String>,
    pub task_description: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_workflow: Option<Value>,
    pub estimated_duration_seconds: Option<u64>,
    pub status: NegotiationStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status of a session-spawned task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Joint MCP/A2A task execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_id: String,
    pub session_id: String,
    /// "mcp_tool" or "a2a_task".
    pub task_type: String,
    pub task_name: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    pub status: ExecutionStatus,
    pub progress: f64,
    pub can_cancel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

impl TaskExecution {
    pub fn new(
        session_id: impl Into<String>,
        task_type: impl Into<String>,
        task_name: impl Into<String>,
        parameters: HashMap<String, Value>,
        can_cancel: bool,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            task_type: task_type.into(),
            task_name: task_name.into(),
            parameters,
            status: ExecutionStatus::Pending,
            progress: 0.0,
            can_cancel,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_by: None,
            cancellation_reason: None,
        }
    }
}

/// One frame of a streamed tool execution. The terminal frame carries
/// `progress == 1.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        (self.progress - 1.0).abs() < f64::EPSILON
    }
}
