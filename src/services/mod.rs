//! Service layer: routing, caching, orchestration, sessions, consent.

pub mod agent_runtime;
pub mod cache;
pub mod config;
pub mod consent;
pub mod logging;
pub mod orchestrator;
pub mod prompt;
pub mod quantum;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod session_manager;

pub use agent_runtime::{
    auto_assign_agent, score_agent_for_task, AgentRuntime, AgentRuntimeConfig, WorkflowContext,
};
pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use config::{ConfigError, CoreConfig};
pub use consent::ConsentGate;
pub use orchestrator::WorkflowOrchestrator;
pub use prompt::{apply_model_envelope, PromptTemplate, TemplateLibrary};
pub use quantum::{QuantumExecutor, QuantumOutcome};
pub use rate_limit::{RateLimitConfig, RateLimitInfo, RateLimiter, UsageTotals};
pub use registry::{ModelRegistry, RegistryConfig};
pub use router::ModelRouter;
pub use session_manager::{
    A2aMessage, A2aResponse, HandshakeResult, McpInitResult, NegotiationResult,
    ResourceContent, ResourceDescriptor, SamplingMessage, SamplingResult, SessionManager,
    SessionManagerConfig, ToolCallOutcome, ToolDescriptor, SERVER_SKILLS,
};
