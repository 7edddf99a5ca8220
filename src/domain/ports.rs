//! Port traits at the seams of the core.
//!
//! Providers, storage, and metric scoring are injected through these
//! traits so tests can substitute in-memory or scripted implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::errors::CoreResult;
use super::models::consent::{AccessPolicy, AuditEntry, ConsentGrant, ConsentRequest};
use super::models::llm::{LlmRequest, LlmResponse};
use super::models::model_spec::ModelSpec;
use super::models::quantum::ThreadResult;
use super::models::session::{A2aSession, ExecutionStatus, McpSession, Negotiation, TaskExecution};

/// Uniform generate-call over one LLM vendor.
///
/// Adapters are stateless except for a client handle; configuration is
/// injected at construction.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id, e.g. `"openai"`.
    fn provider(&self) -> &str;

    /// Translate the uniform request into the vendor call and map the
    /// result back. Transport and vendor errors surface as
    /// [`CoreError::Upstream`](crate::domain::errors::CoreError::Upstream);
    /// the caller decides whether to retry.
    async fn generate(&self, request: &LlmRequest) -> CoreResult<LlmResponse>;

    /// The registry subset this adapter can serve.
    fn list_models(&self) -> Vec<ModelSpec>;

    /// Dollar cost from unit prices. Unknown models cost 0 and log a
    /// warning; this never fails.
    fn cost(&self, input_tokens: u64, output_tokens: u64, model_id: &str) -> f64;
}

/// Minimal remote key-value surface used by the cache and rate limiter.
///
/// Backed by a shared KV service when reachable; the in-process adapter
/// stands in otherwise. All operations are atomic per key.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> CoreResult<()>;
    /// Atomic increment; creates the key at `delta` when absent.
    async fn incr_by(&self, key: &str, delta: f64, ttl_seconds: u64) -> CoreResult<f64>;
}

/// Durable storage for sessions, negotiations, and task executions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put_mcp_session(&self, session: McpSession) -> CoreResult<()>;
    async fn get_mcp_session(&self, session_id: &str) -> CoreResult<Option<McpSession>>;
    async fn list_active_mcp_sessions(&self) -> CoreResult<Vec<McpSession>>;
    /// Idempotent last-activity bump.
    async fn touch_mcp_session(&self, session_id: &str) -> CoreResult<bool>;
    async fn close_mcp_session(&self, session_id: &str) -> CoreResult<bool>;

    async fn put_a2a_session(&self, session: A2aSession) -> CoreResult<()>;
    async fn get_a2a_session(&self, session_id: &str) -> CoreResult<Option<A2aSession>>;
    async fn list_active_a2a_sessions(&self) -> CoreResult<Vec<A2aSession>>;
    async fn touch_a2a_session(&self, session_id: &str, has_stream: Option<bool>)
        -> CoreResult<bool>;
    async fn close_a2a_session(&self, session_id: &str) -> CoreResult<bool>;

    async fn put_negotiation(&self, negotiation: Negotiation) -> CoreResult<()>;
    async fn get_negotiation(&self, negotiation_id: &str) -> CoreResult<Option<Negotiation>>;

    async fn put_task_execution(&self, execution: TaskExecution) -> CoreResult<()>;
    async fn get_task_execution(&self, task_id: &str) -> CoreResult<Option<TaskExecution>>;
    /// Last-writer-wins, but progress never moves backwards.
    async fn update_task_progress(
        &self,
        task_id: &str,
        progress: f64,
        status: Option<ExecutionStatus>,
    ) -> CoreResult<bool>;
    async fn complete_task_execution(
        &self,
        task_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) -> CoreResult<bool>;
    async fn cancel_task_execution(
        &self,
        task_id: &str,
        cancelled_by: &str,
        reason: Option<String>,
    ) -> CoreResult<bool>;
    async fn list_session_tasks(
        &self,
        session_id: &str,
        status: Option<ExecutionStatus>,
    ) -> CoreResult<Vec<TaskExecution>>;
    async fn list_running_tasks(&self) -> CoreResult<Vec<TaskExecution>>;
}

/// Durable storage for consent policies, requests, grants, and audit.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn put_policy(&self, policy: AccessPolicy) -> CoreResult<()>;
    async fn get_policy(
        &self,
        resource_type: &str,
        resource_name: &str,
    ) -> CoreResult<Option<AccessPolicy>>;

    async fn put_request(&self, request: ConsentRequest) -> CoreResult<()>;
    async fn get_request(&self, request_id: Uuid) -> CoreResult<Option<ConsentRequest>>;

    async fn put_grant(&self, grant: ConsentGrant) -> CoreResult<()>;
    /// The newest unrevoked, unexpired grant for a `(user, resource)` pair.
    async fn find_valid_grant(
        &self,
        user_id: &str,
        resource_type: &str,
        resource_name: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<ConsentGrant>>;
    async fn record_grant_use(&self, grant_id: Uuid, at: DateTime<Utc>) -> CoreResult<()>;
    async fn revoke_grant(&self, grant_id: Uuid, at: DateTime<Utc>) -> CoreResult<bool>;
    /// Mark requests whose grants are past expiry; returns how many
    /// changed. Grants themselves stay on record for auditing.
    async fn expire_stale_requests(&self, now: DateTime<Utc>) -> CoreResult<usize>;

    async fn append_audit(&self, entry: AuditEntry) -> CoreResult<()>;
    async fn list_audit(&self, user_id: Option<&str>, limit: usize) -> CoreResult<Vec<AuditEntry>>;
}

/// Pluggable accuracy metric for quantum thread results.
///
/// The default implementation is the `0.8 × success` placeholder; the
/// core does not evaluate response correctness semantically.
pub trait MetricScorer: Send + Sync {
    fn accuracy(&self, thread: &ThreadResult) -> f64;
}

/// Default accuracy scorer.
#[derive(Debug, Default)]
pub struct PlaceholderScorer;

impl MetricScorer for PlaceholderScorer {
    fn accuracy(&self, thread: &ThreadResult) -> f64 {
        if thread.is_success() {
            0.8
        } else {
            0.0
        }
    }
}
