//! MCP and A2A session lifecycle, tool dispatch, and streaming progress.
//!
//! The manager holds protocol state in a [`SessionStore`] and gates
//! every tool dispatch through the consent gate. Transport wiring is an
//! external collaborator; operations here speak typed structs and
//! in-process channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::llm::LlmRequest;
use crate::domain::models::model_spec::ModelId;
use crate::domain::models::routing::RoutingPolicy;
use crate::domain::models::session::{
    A2aSession, ClientInfo, ExecutionStatus, McpSession, Negotiation, NegotiationStatus,
    NetworkOrigin, ProgressEvent, TaskExecution, A2A_PROTOCOL_VERSION, MCP_PROTOCOL_VERSION,
};
use crate::domain::ports::SessionStore;

use super::consent::ConsentGate;
use super::prompt::TemplateLibrary;
use super::router::ModelRouter;

/// Skills this server offers to A2A peers.
pub const SERVER_SKILLS: [&str; 8] = [
    "workflow-orchestration",
    "dynamic-reasoning",
    "code-generation",
    "data-analysis",
    "multi-agent-coordination",
    "streaming-communication",
    "task-cancellation",
    "progress-reporting",
];

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub server_name: String,
    pub server_version: String,
    pub mcp_session_ttl_minutes: i64,
    pub a2a_session_ttl_hours: i64,
    /// Steps a streamed tool execution is divided into.
    pub stream_steps: u64,
    pub stream_step_delay_ms: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            server_name: "hivemind".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            mcp_session_ttl_minutes: 30,
            a2a_session_ttl_hours: 1,
            stream_steps: 10,
            stream_step_delay_ms: 500,
            sweep_interval_secs: 60,
        }
    }
}

/// Result of MCP initialize.
#[derive(Debug, Clone)]
pub struct McpInitResult {
    pub session_id: String,
    pub protocol_version: String,
    pub server_name: String,
    pub server_version: String,
    pub capabilities: HashMap<String, Value>,
}

/// One entry in the resource inventory.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

/// Resource body returned by a read.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceContent {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

/// One entry in the tool inventory.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Outcome of an MCP tool call.
#[derive(Debug)]
pub enum ToolCallOutcome {
    /// Ran to completion: rendered content, task id, metadata block.
    Completed {
        content: String,
        task_id: String,
        metadata: Value,
    },
    /// Streaming: progress frames arrive on the channel; the terminal
    /// frame has progress == 1, a cancelled run ends early with one
    /// cancellation frame.
    Stream {
        task_id: String,
        events: mpsc::Receiver<ProgressEvent>,
    },
}

/// Result of an A2A handshake.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HandshakeResult {
    pub session_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub capabilities: Vec<String>,
    pub protocol_version: String,
    pub expires_at: chrono::DateTime<Utc>,
    pub public_key: Option<String>,
}

/// Result of an A2A negotiation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NegotiationResult {
    pub negotiation_id: String,
    pub available_skills: Vec<String>,
    pub proposed_workflow: Value,
    pub estimated_duration_seconds: u64,
    pub accepted: bool,
}

/// Incoming A2A point-to-point message.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct A2aMessage {
    pub message_id: String,
    pub session_id: String,
    pub message_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// Response to an A2A message.
#[derive(Debug, Clone, serde::Serialize)]
pub struct A2aResponse {
    pub message_id: String,
    pub response_to: String,
    pub status: String,
    pub payload: Value,
    pub timestamp: chrono::DateTime<Utc>,
}

/// One message in a sampling request.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SamplingMessage {
    pub role: String,
    pub content: String,
}

/// Result of MCP sampling `create_message`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SamplingResult {
    pub model: String,
    pub role: String,
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Session, negotiation, and task-execution lifecycle for both protocols.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    consent: Arc<ConsentGate>,
    templates: TemplateLibrary,
    config: SessionManagerConfig,
    /// Required only for the sampling surface.
    router: Option<Arc<ModelRouter>>,
}

impl SessionManager {
    /// Build the manager and run restart recovery: any task execution
    /// still marked running belongs to a dead process and fails now.
    pub async fn new(
        store: Arc<dyn SessionStore>,
        consent: Arc<ConsentGate>,
        config: SessionManagerConfig,
    ) -> CoreResult<Self> {
        let manager = Self {
            store,
            consent,
            templates: TemplateLibrary::default(),
            config,
            router: None,
        };
        manager.recover().await?;
        Ok(manager)
    }

    /// Attach a router to enable the sampling surface.
    pub fn with_router(mut self, router: Arc<ModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    async fn recover(&self) -> CoreResult<()> {
        let running = self.store.list_running_tasks().await?;
        for task in &running {
            self.store
                .complete_task_execution(&task.task_id, None, Some("server_restart".to_string()))
                .await?;
        }
        if !running.is_empty() {
            warn!(count = running.len(), "failed in-flight tasks from previous run");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // MCP
    // ------------------------------------------------------------------

    /// MCP initialize: version handshake plus session creation.
    pub async fn mcp_initialize(
        &self,
        protocol_version: &str,
        client_info: ClientInfo,
        client_capabilities: HashMap<String, Value>,
        origin: NetworkOrigin,
    ) -> CoreResult<McpInitResult> {
        if protocol_version != MCP_PROTOCOL_VERSION {
            return Err(CoreError::ProtocolMismatch {
                got: protocol_version.to_string(),
                expected: MCP_PROTOCOL_VERSION.to_string(),
            });
        }

        let capabilities = Self::server_capabilities();
        let session = McpSession::new(
            client_info,
            client_capabilities,
            capabilities.clone(),
            self.config.mcp_session_ttl_minutes,
            origin,
        );
        let session_id = session.session_id.clone();
        self.store.put_mcp_session(session).await?;
        info!(session_id = %session_id, "MCP session initialized");

        Ok(McpInitResult {
            session_id,
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            server_name: self.config.server_name.clone(),
            server_version: self.config.server_version.clone(),
            capabilities,
        })
    }

    fn server_capabilities() -> HashMap<String, Value> {
        HashMap::from([
            (
                "resources".to_string(),
                json!({ "subscribe": true, "listChanged": true }),
            ),
            (
                "tools".to_string(),
                json!({ "listChanged": true, "progress": true, "cancellation": true }),
            ),
            ("prompts".to_string(), json!({ "listChanged": true })),
            ("sampling".to_string(), json!({})),
        ])
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        let describe = |uri: &str, name: &str, description: &str| ResourceDescriptor {
            uri: uri.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            mime_type: "application/json".to_string(),
        };
        vec![
            describe("agent://default", "Default Agent", "General-purpose agent"),
            describe("agent://reasoning", "Reasoning Agent", "Multi-step reasoning agent"),
            describe("agent://code", "Code Agent", "Code generation agent"),
            describe("workflow://templates", "Workflow Templates", "Reusable workflow templates"),
            describe("workflow://active", "Active Workflows", "Currently running workflows"),
            describe("system://metrics", "System Metrics", "Live session and task counters"),
            describe("system://logs", "System Logs", "Recent system activity"),
        ]
    }

    pub async fn read_resource(&self, uri: &str) -> CoreResult<ResourceContent> {
        let text = if let Some(agent_type) = uri.strip_prefix("agent://") {
            json!({
                "agent_type": agent_type,
                "status": "available",
                "capabilities": ["text-generation", "task-execution"],
            })
            .to_string()
        } else if let Some(kind) = uri.strip_prefix("workflow://") {
            match kind {
                "templates" => json!({
                    "templates": ["research", "code_development"],
                })
                .to_string(),
                "active" => {
                    let running = self.store.list_running_tasks().await?;
                    json!({ "running_tasks": running.len() }).to_string()
                }
                other => {
                    return Err(CoreError::not_found("Resource", format!("workflow://{other}")))
                }
            }
        } else if let Some(kind) = uri.strip_prefix("system://") {
            match kind {
                "metrics" => serde_json::to_string(&self.statistics().await?)?,
                "logs" => json!({ "entries": [] }).to_string(),
                other => {
                    return Err(CoreError::not_found("Resource", format!("system://{other}")))
                }
            }
        } else {
            return Err(CoreError::not_found("Resource", uri.to_string()));
        };

        Ok(ResourceContent {
            uri: uri.to_string(),
            mime_type: "application/json".to_string(),
            text,
        })
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "execute_agent".to_string(),
                description: "Execute a task with a specific agent".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "agent_id": { "type": "string" },
                        "task": { "type": "string" },
                    },
                    "required": ["task"],
                }),
            },
            ToolDescriptor {
                name: "create_workflow".to_string(),
                description: "Create a multi-agent workflow".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "agents": { "type": "array", "items": { "type": "string" } },
                    },
                    "required": ["name"],
                }),
            },
            ToolDescriptor {
                name: "analyze_system".to_string(),
                description: "Analyze system state and performance".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "scope": { "type": "string" },
                        "detailed": { "type": "boolean" },
                    },
                }),
            },
        ]
    }

    pub fn list_prompts(&self) -> Vec<String> {
        self.templates
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Render a named prompt template with the given variables.
    pub fn get_prompt(&self, name: &str, variables: &HashMap<String, String>) -> String {
        self.templates.get(name).render(variables)
    }

    /// Dispatch one MCP tool call after the consent gate clears it.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        session_id: Option<&str>,
        user_id: &str,
        stream: bool,
        can_cancel: bool,
        origin: NetworkOrigin,
    ) -> CoreResult<ToolCallOutcome> {
        if let Some(session_id) = session_id {
            self.store.touch_mcp_session(session_id).await?;
        }

        let decision = self
            .consent
            .check_access(user_id, "tool", tool_name, &["execute".to_string()], &origin)
            .await?;
        if !decision.allowed {
            return Err(CoreError::ConsentDenied(decision.reason));
        }

        if !self.list_tools().iter().any(|t| t.name == tool_name) {
            return Err(CoreError::not_found("Tool", tool_name.to_string()));
        }

        let execution = TaskExecution::new(
            session_id.unwrap_or("anonymous"),
            "mcp_tool",
            tool_name,
            arguments.clone().into_iter().collect(),
            can_cancel,
        );
        let task_id = execution.task_id.clone();
        self.store.put_task_execution(execution).await?;

        if stream {
            let events = self.spawn_stream(tool_name.to_string(), task_id.clone());
            return Ok(ToolCallOutcome::Stream { task_id, events });
        }

        self.store
            .update_task_progress(&task_id, 0.0, Some(ExecutionStatus::Running))
            .await?;
        let (content, metadata) = self.run_tool(tool_name, &arguments, &task_id).await?;
        self.store
            .complete_task_execution(&task_id, Some(metadata.clone()), None)
            .await?;

        Ok(ToolCallOutcome::Completed {
            content,
            task_id,
            metadata,
        })
    }

    /// Drive a streamed tool execution: fixed steps, persisted progress,
    /// cancellation checked between frames.
    fn spawn_stream(&self, tool_name: String, task_id: String) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(16);
        let store = Arc::clone(&self.store);
        let steps = self.config.stream_steps;
        let delay = Duration::from_millis(self.config.stream_step_delay_ms);

        tokio::spawn(async move {
            for step in 0..=steps {
                // A caller-side cancel flips the stored status; emit one
                // cancellation frame and stop.
                if let Ok(Some(execution)) = store.get_task_execution(&task_id).await {
                    if execution.status == ExecutionStatus::Cancelled {
                        let _ = tx
                            .send(ProgressEvent {
                                progress: execution.progress,
                                total: Some(steps),
                                completed: Some(step.saturating_sub(1)),
                                message: Some("cancelled".to_string()),
                            })
                            .await;
                        return;
                    }
                }

                let progress = step as f64 / steps as f64;
                let status = if step < steps {
                    ExecutionStatus::Running
                } else {
                    ExecutionStatus::Completed
                };
                let _ = store
                    .update_task_progress(&task_id, progress, Some(status))
                    .await;
                let sent = tx
                    .send(ProgressEvent {
                        progress,
                        total: Some(steps),
                        completed: Some(step),
                        message: Some(format!("Executing {tool_name} - Step {step}/{steps}")),
                    })
                    .await;
                if sent.is_err() {
                    // Receiver hung up; leave the record as-is for status
                    // polls.
                    return;
                }
                if step < steps {
                    tokio::time::sleep(delay).await;
                }
            }
        });
        rx
    }

    async fn run_tool(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        task_id: &str,
    ) -> CoreResult<(String, Value)> {
        let arg_str = |key: &str, default: &str| -> String {
            arguments
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        match tool_name {
            "execute_agent" => {
                let agent_id = arg_str("agent_id", "default");
                let task = arg_str("task", "unknown");
                let content = format!("Agent {agent_id} executed task: {task}");
                let metadata = json!({
                    "task_id": task_id,
                    "agent_id": agent_id,
                    "task": task,
                    "status": "completed",
                });
                Ok((content, metadata))
            }
            "create_workflow" => {
                let name = arg_str("name", "unnamed");
                let workflow_id = Uuid::new_v4().to_string();
                let content = format!("Created workflow: {name} with ID: {workflow_id}");
                let metadata = json!({
                    "task_id": task_id,
                    "workflow_name": name,
                    "workflow_id": workflow_id,
                    "agents": arguments.get("agents").cloned().unwrap_or(json!([])),
                    "status": "created",
                });
                Ok((content, metadata))
            }
            "analyze_system" => {
                let scope = arg_str("scope", "performance");
                let stats = self.statistics().await?;
                let content = format!("System {scope} analysis completed");
                let metadata = json!({
                    "task_id": task_id,
                    "scope": scope,
                    "detailed": arguments.get("detailed").and_then(Value::as_bool).unwrap_or(false),
                    "analysis": {
                        "summary": content,
                        "metrics": stats,
                        "recommendations": [
                            "System operating within normal parameters",
                            "No immediate action required",
                        ],
                    },
                });
                Ok((content, metadata))
            }
            other => Err(CoreError::not_found("Tool", other.to_string())),
        }
    }

    /// Cancel a task execution by id. Cancelled streams emit one final
    /// cancellation frame.
    pub async fn cancel_task(&self, task_id: &str, cancelled_by: &str) -> CoreResult<bool> {
        self.store
            .cancel_task_execution(task_id, cancelled_by, Some("cancelled by caller".to_string()))
            .await
    }

    pub async fn task_status(&self, task_id: &str) -> CoreResult<TaskExecution> {
        self.store
            .get_task_execution(task_id)
            .await?
            .ok_or_else(|| CoreError::not_found("TaskExecution", task_id.to_string()))
    }

    pub async fn close_mcp_session(&self, session_id: &str) -> CoreResult<bool> {
        let closed = self.store.close_mcp_session(session_id).await?;
        if closed {
            self.cancel_session_tasks(session_id).await?;
        }
        Ok(closed)
    }

    /// MCP sampling: run one message exchange through the router.
    pub async fn create_message(
        &self,
        model: Option<&str>,
        messages: &[SamplingMessage],
        max_tokens: u64,
    ) -> CoreResult<SamplingResult> {
        let router = self
            .router
            .as_ref()
            .ok_or_else(|| CoreError::Validation("sampling requires a router".into()))?;

        let prompt = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let mut request = LlmRequest::new(prompt).with_max_tokens(max_tokens);
        if let Some(model) = model {
            request.model = Some(model.parse::<ModelId>()?);
        }

        let response = router
            .route(request, &RoutingPolicy::default(), false)
            .await?;
        Ok(SamplingResult {
            model: response.model.as_str().to_string(),
            role: "assistant".to_string(),
            content: response.content,
            prompt_tokens: response.input_tokens,
            completion_tokens: response.output_tokens,
            total_tokens: response.tokens_used,
        })
    }

    // ------------------------------------------------------------------
    // A2A
    // ------------------------------------------------------------------

    /// A2A handshake: validate the protocol version and open a session.
    pub async fn a2a_handshake(
        &self,
        agent_id: &str,
        agent_name: &str,
        capabilities: Vec<String>,
        protocol_version: &str,
        public_key: Option<String>,
        origin: NetworkOrigin,
    ) -> CoreResult<HandshakeResult> {
        if protocol_version != A2A_PROTOCOL_VERSION {
            return Err(CoreError::ProtocolMismatch {
                got: protocol_version.to_string(),
                expected: A2A_PROTOCOL_VERSION.to_string(),
            });
        }

        let session = A2aSession::new(
            agent_id,
            agent_name,
            capabilities,
            self.config.a2a_session_ttl_hours,
            public_key,
            origin,
        );
        let result = HandshakeResult {
            session_id: session.session_id.clone(),
            agent_id: self.config.server_name.clone(),
            agent_name: self.config.server_name.clone(),
            capabilities: SERVER_SKILLS.iter().map(|s| s.to_string()).collect(),
            protocol_version: A2A_PROTOCOL_VERSION.to_string(),
            expires_at: session.expires_at,
            public_key: None,
        };
        self.store.put_a2a_session(session).await?;
        info!(session_id = %result.session_id, peer = agent_id, "A2A handshake completed");
        Ok(result)
    }

    async fn active_a2a_session(&self, session_id: &str) -> CoreResult<A2aSession> {
        let session = self
            .store
            .get_a2a_session(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Session", session_id.to_string()))?;
        if !session.is_active || session.is_expired() {
            return Err(CoreError::SessionExpired(session_id.to_string()));
        }
        Ok(session)
    }

    /// Skill negotiation: intersect requested skills with the server's,
    /// score confidence, and propose an ordered workflow.
    pub async fn a2a_negotiate(
        &self,
        session_id: &str,
        requested_skills: Vec<String>,
        task_description: String,
        parameters: HashMap<String, Value>,
        priority: u8,
    ) -> CoreResult<NegotiationResult> {
        self.active_a2a_session(session_id).await?;
        self.store.touch_a2a_session(session_id, None).await?;

        let available: Vec<String> = requested_skills
            .iter()
            .filter(|skill| SERVER_SKILLS.contains(&skill.as_str()))
            .cloned()
            .collect();

        let confidence: HashMap<&str, f64> = available
            .iter()
            .map(|skill| (skill.as_str(), skill_confidence(skill)))
            .collect();
        let accepted =
            !available.is_empty() && confidence.values().all(|score| *score >= 0.7);

        let mut estimated_duration = 300u64;
        if available.iter().any(|s| s == "workflow-orchestration") {
            estimated_duration += 300;
        }
        if available.len() > 2 {
            estimated_duration += 150;
        }

        let steps: Vec<Value> = available
            .iter()
            .enumerate()
            .map(|(index, skill)| {
                json!({
                    "step": index + 1,
                    "action": format!("apply {skill}"),
                    "skills": [skill],
                    "confidence": confidence[skill.as_str()],
                })
            })
            .collect();
        let proposed_workflow = json!({
            "task": task_description,
            "steps": steps,
            "parallel_execution": available.len() > 1,
            "skill_confidence": confidence,
            "fallback_plan": "Use general reasoning if specific skills unavailable",
        });

        let negotiation = Negotiation {
            negotiation_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            requested_skills,
            available_skills: available.clone(),
            task_description,
            parameters,
            priority: priority.clamp(1, 10),
            proposed_workflow: Some(proposed_workflow.clone()),
            estimated_duration_seconds: Some(estimated_duration),
            status: if accepted {
                NegotiationStatus::Accepted
            } else {
                NegotiationStatus::Rejected
            },
            created_at: Utc::now(),
            completed_at: None,
        };
        let negotiation_id = negotiation.negotiation_id.clone();
        self.store.put_negotiation(negotiation).await?;
        info!(negotiation_id = %negotiation_id, accepted, "A2A negotiation completed");

        Ok(NegotiationResult {
            negotiation_id,
            available_skills: available,
            proposed_workflow,
            estimated_duration_seconds: estimated_duration,
            accepted,
        })
    }

    /// Point-to-point A2A messaging, dispatched by message type.
    pub async fn a2a_communicate(&self, message: A2aMessage) -> CoreResult<A2aResponse> {
        self.active_a2a_session(&message.session_id).await?;
        self.store
            .touch_a2a_session(&message.session_id, None)
            .await?;

        let payload = match message.message_type.as_str() {
            "task_request" => {
                let task_name = message
                    .payload
                    .get("task_name")
                    .and_then(Value::as_str)
                    .unwrap_or("A2A Task");
                let execution = TaskExecution::new(
                    message.session_id.as_str(),
                    "a2a_task",
                    task_name,
                    message.payload.clone().into_iter().collect(),
                    true,
                );
                let task_id = execution.task_id.clone();
                self.store.put_task_execution(execution).await?;
                json!({
                    "status": "acknowledged",
                    "task_id": task_id,
                    "estimated_completion": (Utc::now() + chrono::Duration::minutes(5)),
                    "can_cancel": true,
                })
            }
            "status_inquiry" => {
                let running = self
                    .store
                    .list_session_tasks(&message.session_id, Some(ExecutionStatus::Running))
                    .await?;
                json!({
                    "status": "active",
                    "current_tasks": running.len(),
                    "load_percentage": (25.0 + running.len() as f64 * 10.0).min(90.0),
                    "capabilities_available": true,
                })
            }
            "result_request" => match message.payload.get("task_id").and_then(Value::as_str) {
                Some(task_id) => match self.store.get_task_execution(task_id).await? {
                    Some(task) => json!({
                        "status": task.status.as_str(),
                        "progress": task.progress,
                        "result": task.result,
                        "error": task.error,
                        "completed_at": task.completed_at,
                    }),
                    None => json!({
                        "status": "not_found",
                        "error": format!("Task {task_id} not found"),
                    }),
                },
                None => json!({
                    "status": "error",
                    "error": "task_id required for result_request",
                }),
            },
            "heartbeat" => json!({
                "status": "alive",
                "timestamp": Utc::now(),
                "session_active": true,
            }),
            "capability_inquiry" => json!({
                "capabilities": SERVER_SKILLS,
                "protocol_version": A2A_PROTOCOL_VERSION,
                "features": {
                    "streaming": true,
                    "cancellation": true,
                    "progress_tracking": true,
                },
            }),
            other => json!({
                "status": "unsupported_message_type",
                "unsupported_type": other,
                "supported_types": [
                    "task_request",
                    "status_inquiry",
                    "result_request",
                    "heartbeat",
                    "capability_inquiry",
                ],
            }),
        };

        Ok(A2aResponse {
            message_id: Uuid::new_v4().to_string(),
            response_to: message.message_id,
            status: "processed".to_string(),
            payload,
            timestamp: Utc::now(),
        })
    }

    /// Bind a stream channel to a session and return the greeting frame.
    pub async fn a2a_stream_connect(&self, session_id: &str) -> CoreResult<Value> {
        self.active_a2a_session(session_id).await?;
        self.store.touch_a2a_session(session_id, Some(true)).await?;
        Ok(json!({
            "type": "connection_established",
            "session_id": session_id,
            "agent_id": self.config.server_name,
            "capabilities": [
                "streaming-communication",
                "task-cancellation",
                "progress-reporting",
                "real-time-updates",
            ],
            "timestamp": Utc::now(),
        }))
    }

    /// Dispatch one stream message and produce the reply frame.
    pub async fn a2a_stream_handle(&self, session_id: &str, message: Value) -> CoreResult<Value> {
        self.active_a2a_session(session_id).await?;
        let message_type = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        let reply = match message_type {
            "ping" => json!({ "type": "pong", "timestamp": Utc::now() }),
            "state_update" => json!({
                "type": "state_acknowledged",
                "state": message.get("state").cloned().unwrap_or(json!("unknown")),
                "progress": message.get("progress").cloned().unwrap_or(json!(0.0)),
                "timestamp": Utc::now(),
            }),
            "task_progress" => {
                let task_id = message.get("task_id").and_then(Value::as_str);
                let progress = message
                    .get("progress")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                if let Some(task_id) = task_id {
                    self.store
                        .update_task_progress(task_id, progress, None)
                        .await?;
                }
                json!({
                    "type": "progress_acknowledged",
                    "task_id": task_id,
                    "progress": progress,
                    "timestamp": Utc::now(),
                })
            }
            "subscribe_updates" => json!({
                "type": "subscription_confirmed",
                "update_types": message.get("update_types").cloned().unwrap_or(json!([])),
                "timestamp": Utc::now(),
            }),
            "cancel_task" => {
                let task_id = message.get("task_id").and_then(Value::as_str);
                let success = match task_id {
                    Some(task_id) => self.cancel_task(task_id, "stream_client").await?,
                    None => false,
                };
                json!({
                    "type": "cancellation_result",
                    "task_id": task_id,
                    "success": success,
                    "timestamp": Utc::now(),
                })
            }
            other => json!({
                "type": "error",
                "message": format!("Unsupported message type: {other}"),
                "supported_types": [
                    "ping",
                    "state_update",
                    "task_progress",
                    "subscribe_updates",
                    "cancel_task",
                ],
                "timestamp": Utc::now(),
            }),
        };
        Ok(reply)
    }

    /// Stream disconnect clears the bound flag; the session stays alive
    /// until expiry.
    pub async fn a2a_stream_disconnect(&self, session_id: &str) -> CoreResult<()> {
        self.store.touch_a2a_session(session_id, Some(false)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// One sweep pass: deactivate expired sessions and cancel their
    /// outstanding tasks.
    pub async fn sweep_expired(&self) -> CoreResult<usize> {
        let mut swept = 0;

        for session in self.store.list_active_mcp_sessions().await? {
            if session.is_expired() {
                self.store.close_mcp_session(&session.session_id).await?;
                self.cancel_session_tasks(&session.session_id).await?;
                swept += 1;
            }
        }
        for session in self.store.list_active_a2a_sessions().await? {
            if session.is_expired() {
                self.store.close_a2a_session(&session.session_id).await?;
                self.cancel_session_tasks(&session.session_id).await?;
                swept += 1;
            }
        }
        if swept > 0 {
            info!(swept, "expired sessions cleaned up");
        }
        Ok(swept)
    }

    /// Background sweeper loop.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = Duration::from_secs(manager.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.sweep_expired().await {
                    warn!(error = %e, "session sweep failed");
                }
            }
        })
    }

    async fn cancel_session_tasks(&self, session_id: &str) -> CoreResult<()> {
        for task in self.store.list_session_tasks(session_id, None).await? {
            if !task.status.is_terminal() {
                self.store
                    .cancel_task_execution(&task.task_id, "session_close", None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Live counters for dashboards and the metrics resource.
    pub async fn statistics(&self) -> CoreResult<Value> {
        let mcp = self.store.list_active_mcp_sessions().await?;
        let a2a = self.store.list_active_a2a_sessions().await?;
        let running = self.store.list_running_tasks().await?;
        Ok(json!({
            "active_mcp_sessions": mcp.iter().filter(|s| !s.is_expired()).count(),
            "active_a2a_sessions": a2a.iter().filter(|s| !s.is_expired()).count(),
            "running_tasks": running.len(),
        }))
    }
}

fn skill_confidence(skill: &str) -> f64 {
    match skill {
        "workflow-orchestration" => 0.95,
        "dynamic-reasoning" => 0.90,
        "code-generation" => 0.85,
        _ => 0.75,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryConsentStore, InMemorySessionStore};
    use crate::domain::models::consent::AccessPolicy;
    use crate::domain::ports::ConsentStore;
    use crate::services::rate_limit::{RateLimitConfig, RateLimiter};

    async fn manager() -> (Arc<SessionManager>, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let consent_store = Arc::new(InMemoryConsentStore::new());
        for tool in ["execute_agent", "create_workflow", "analyze_system"] {
            consent_store
                .put_policy(AccessPolicy {
                    resource_type: "tool".into(),
                    resource_name: tool.into(),
                    required_permissions: vec!["execute".into()],
                    auto_approve: true,
                    max_usage_per_hour: None,
                })
                .await
                .unwrap();
        }
        let consent = Arc::new(ConsentGate::new(
            consent_store,
            Arc::new(RateLimiter::in_process(RateLimitConfig::default())),
        ));
        let config = SessionManagerConfig {
            stream_step_delay_ms: 1,
            ..Default::default()
        };
        let manager = SessionManager::new(Arc::clone(&store) as Arc<dyn SessionStore>, consent, config)
            .await
            .unwrap();
        (Arc::new(manager), store)
    }

    fn client() -> ClientInfo {
        ClientInfo {
            name: "test-client".into(),
            version: "1.0".into(),
        }
    }

    #[tokio::test]
    async fn initialize_rejects_wrong_version() {
        let (manager, _) = manager().await;
        let err = manager
            .mcp_initialize("1999-01-01", client(), HashMap::new(), NetworkOrigin::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn initialize_returns_capabilities() {
        let (manager, store) = manager().await;
        let result = manager
            .mcp_initialize(
                MCP_PROTOCOL_VERSION,
                client(),
                HashMap::new(),
                NetworkOrigin::default(),
            )
            .await
            .unwrap();
        assert!(result.capabilities.contains_key("tools"));
        assert!(result.capabilities.contains_key("sampling"));
        assert!(store
            .get_mcp_session(&result.session_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn tool_call_produces_execution_record() {
        let (manager, _) = manager().await;
        let mut args = Map::new();
        args.insert("task".into(), json!("summarize the report"));

        let outcome = manager
            .call_tool("execute_agent", args, None, "u1", false, true, NetworkOrigin::default())
            .await
            .unwrap();
        let ToolCallOutcome::Completed { content, task_id, .. } = outcome else {
            panic!("expected completed outcome");
        };
        assert!(content.contains("summarize the report"));

        let status = manager.task_status(&task_id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Completed);
        assert!((status.progress - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let (manager, _) = manager().await;
        let err = manager
            .call_tool(
                "rm_rf",
                Map::new(),
                None,
                "u1",
                false,
                true,
                NetworkOrigin::default(),
            )
            .await
            .unwrap_err();
        // The consent gate fires first: no policy exists for this tool.
        assert!(matches!(err, CoreError::ConsentDenied(_)));
    }

    #[tokio::test]
    async fn stream_emits_terminal_frame() {
        let (manager, _) = manager().await;
        let mut args = Map::new();
        args.insert("task".into(), json!("long job"));

        let outcome = manager
            .call_tool("execute_agent", args, None, "u1", true, true, NetworkOrigin::default())
            .await
            .unwrap();
        let ToolCallOutcome::Stream { mut events, task_id } = outcome else {
            panic!("expected stream outcome");
        };

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        let last = last.unwrap();
        assert!(last.is_terminal());

        let status = manager.task_status(&task_id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn handshake_then_negotiate_then_communicate() {
        let (manager, _) = manager().await;
        let handshake = manager
            .a2a_handshake(
                "peer-1",
                "Peer One",
                vec!["code-generation".into()],
                A2A_PROTOCOL_VERSION,
                None,
                NetworkOrigin::default(),
            )
            .await
            .unwrap();

        let negotiation = manager
            .a2a_negotiate(
                &handshake.session_id,
                vec!["workflow-orchestration".into(), "code-generation".into()],
                "build a parser".into(),
                HashMap::new(),
                5,
            )
            .await
            .unwrap();
        assert!(negotiation.accepted);
        assert_eq!(negotiation.available_skills.len(), 2);
        assert_eq!(negotiation.estimated_duration_seconds, 600);

        let response = manager
            .a2a_communicate(A2aMessage {
                message_id: "m1".into(),
                session_id: handshake.session_id.clone(),
                message_type: "task_request".into(),
                payload: Map::from_iter([("task_name".to_string(), json!("build"))]),
            })
            .await
            .unwrap();
        assert_eq!(response.response_to, "m1");
        let task_id = response.payload["task_id"].as_str().unwrap().to_string();

        let result = manager
            .a2a_communicate(A2aMessage {
                message_id: "m2".into(),
                session_id: handshake.session_id,
                message_type: "result_request".into(),
                payload: Map::from_iter([("task_id".to_string(), json!(task_id))]),
            })
            .await
            .unwrap();
        assert_eq!(result.payload["status"], "pending");
    }

    #[tokio::test]
    async fn negotiate_rejects_unknown_skills() {
        let (manager, _) = manager().await;
        let handshake = manager
            .a2a_handshake(
                "peer-1",
                "Peer One",
                vec![],
                A2A_PROTOCOL_VERSION,
                None,
                NetworkOrigin::default(),
            )
            .await
            .unwrap();

        let negotiation = manager
            .a2a_negotiate(
                &handshake.session_id,
                vec!["quantum-teleportation".into()],
                "impossible".into(),
                HashMap::new(),
                5,
            )
            .await
            .unwrap();
        assert!(!negotiation.accepted);
        assert!(negotiation.available_skills.is_empty());
    }

    #[tokio::test]
    async fn unknown_communicate_type_lists_supported() {
        let (manager, _) = manager().await;
        let handshake = manager
            .a2a_handshake(
                "peer-1",
                "Peer One",
                vec![],
                A2A_PROTOCOL_VERSION,
                None,
                NetworkOrigin::default(),
            )
            .await
            .unwrap();

        let response = manager
            .a2a_communicate(A2aMessage {
                message_id: "m1".into(),
                session_id: handshake.session_id,
                message_type: "telepathy".into(),
                payload: Map::new(),
            })
            .await
            .unwrap();
        assert_eq!(response.payload["status"], "unsupported_message_type");
        assert!(response.payload["supported_types"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t == "heartbeat"));
    }

    #[tokio::test]
    async fn stream_dispatch_ping_and_cancel() {
        let (manager, store) = manager().await;
        let handshake = manager
            .a2a_handshake(
                "peer-1",
                "Peer One",
                vec![],
                A2A_PROTOCOL_VERSION,
                None,
                NetworkOrigin::default(),
            )
            .await
            .unwrap();
        let session_id = handshake.session_id.clone();

        let greeting = manager.a2a_stream_connect(&session_id).await.unwrap();
        assert_eq!(greeting["type"], "connection_established");
        assert!(store
            .get_a2a_session(&session_id)
            .await
            .unwrap()
            .unwrap()
            .has_stream);

        let pong = manager
            .a2a_stream_handle(&session_id, json!({ "type": "ping" }))
            .await
            .unwrap();
        assert_eq!(pong["type"], "pong");

        // Seed a running task, then cancel it over the stream.
        let execution = TaskExecution::new(session_id.as_str(), "a2a_task", "t", HashMap::new(), true);
        let task_id = execution.task_id.clone();
        store.put_task_execution(execution).await.unwrap();
        let reply = manager
            .a2a_stream_handle(&session_id, json!({ "type": "cancel_task", "task_id": task_id }))
            .await
            .unwrap();
        assert_eq!(reply["type"], "cancellation_result");
        assert_eq!(reply["success"], true);

        manager.a2a_stream_disconnect(&session_id).await.unwrap();
        let session = store.get_a2a_session(&session_id).await.unwrap().unwrap();
        assert!(!session.has_stream);
        assert!(session.is_active);
    }

    #[tokio::test]
    async fn restart_recovery_fails_running_tasks() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut execution = TaskExecution::new("s1", "mcp_tool", "t", HashMap::new(), true);
        execution.status = ExecutionStatus::Running;
        let task_id = execution.task_id.clone();
        store.put_task_execution(execution).await.unwrap();

        let consent = Arc::new(ConsentGate::new(
            Arc::new(InMemoryConsentStore::new()),
            Arc::new(RateLimiter::in_process(RateLimitConfig::default())),
        ));
        let _manager = SessionManager::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            consent,
            SessionManagerConfig::default(),
        )
        .await
        .unwrap();

        let task = store.get_task_execution(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, ExecutionStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("server_restart"));
    }
}
