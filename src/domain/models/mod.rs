//! Domain models for the orchestrator core.

pub mod agent;
pub mod consent;
pub mod llm;
pub mod model_spec;
pub mod quantum;
pub mod routing;
pub mod session;
pub mod task;
pub mod workflow;

pub use agent::{AgentDefinition, AgentMemory, AgentRole};
pub use consent::{
    AccessDecision, AccessPolicy, AuditAction, AuditEntry, ConsentGrant, ConsentRequest,
    ConsentStatus,
};
pub use llm::{FinishReason, LlmRequest, LlmResponse, ResponseFormat, ToolCall, ToolSchema};
pub use model_spec::{Capability, ModelId, ModelSpec};
pub use quantum::{
    CollapseStrategy, ExecutionSummary, MetricWeights, PromptMods, QuantumStatus, QuantumTask,
    ThreadMetrics, ThreadResult, ThreadStatus, Variation, MAX_PARALLEL_EXECUTIONS,
};
pub use routing::RoutingPolicy;
pub use session::{
    A2aSession, ClientInfo, ExecutionStatus, McpSession, Negotiation, NegotiationStatus,
    NetworkOrigin, ProgressEvent, TaskExecution, A2A_PROTOCOL_VERSION, MCP_PROTOCOL_VERSION,
};
pub use task::{Task, TaskOutput, TaskStatus};
pub use workflow::{ConsensusConfig, Workflow, WorkflowReport, WorkflowStatus};
