//! In-memory implementations of the storage ports.
//!
//! The production deployment plugs external persistence in behind the
//! same traits; these adapters back tests and single-process setups.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::consent::{AccessPolicy, AuditEntry, ConsentGrant, ConsentRequest};
use crate::domain::models::session::{
    A2aSession, ExecutionStatus, McpSession, Negotiation, TaskExecution,
};
use crate::domain::ports::{ConsentStore, KvStore, SessionStore};

/// TTL-aware in-process key-value store.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
    numbers: RwLock<HashMap<String, (f64, DateTime<Utc>)>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(value, expires)| {
            if *expires > Utc::now() {
                Some(value.clone())
            } else {
                None
            }
        }))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> CoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            (
                value.to_string(),
                Utc::now() + Duration::seconds(ttl_seconds as i64),
            ),
        );
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: f64, ttl_seconds: u64) -> CoreResult<f64> {
        let mut numbers = self.numbers.write().await;
        let now = Utc::now();
        let entry = numbers
            .entry(key.to_string())
            .and_modify(|(value, expires)| {
                if *expires <= now {
                    *value = 0.0;
                    *expires = now + Duration::seconds(ttl_seconds as i64);
                }
            })
            .or_insert((0.0, now + Duration::seconds(ttl_seconds as i64)));
        entry.0 += delta;
        Ok(entry.0)
    }
}

/// In-memory session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    mcp: RwLock<HashMap<String, McpSession>>,
    a2a: RwLock<HashMap<String, A2aSession>>,
    negotiations: RwLock<HashMap<String, Negotiation>>,
    executions: RwLock<HashMap<String, TaskExecution>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put_mcp_session(&self, session: McpSession) -> CoreResult<()> {
        self.mcp
            .write()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_mcp_session(&self, session_id: &str) -> CoreResult<Option<McpSession>> {
        Ok(self.mcp.read().await.get(session_id).cloned())
    }

    async fn list_active_mcp_sessions(&self) -> CoreResult<Vec<McpSession>> {
        // Expired-but-open sessions are included; the sweeper needs to
        // see them to close them.
        Ok(self
            .mcp
            .read()
            .await
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn touch_mcp_session(&self, session_id: &str) -> CoreResult<bool> {
        let mut sessions = self.mcp.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_mcp_session(&self, session_id: &str) -> CoreResult<bool> {
        let mut sessions = self.mcp.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put_a2a_session(&self, session: A2aSession) -> CoreResult<()> {
        self.a2a
            .write()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_a2a_session(&self, session_id: &str) -> CoreResult<Option<A2aSession>> {
        Ok(self.a2a.read().await.get(session_id).cloned())
    }

    async fn list_active_a2a_sessions(&self) -> CoreResult<Vec<A2aSession>> {
        Ok(self
            .a2a
            .read()
            .await
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn touch_a2a_session(
        &self,
        session_id: &str,
        has_stream: Option<bool>,
    ) -> CoreResult<bool> {
        let mut sessions = self.a2a.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.last_activity = Utc::now();
                if let Some(bound) = has_stream {
                    session.has_stream = bound;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_a2a_session(&self, session_id: &str) -> CoreResult<bool> {
        let mut sessions = self.a2a.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.is_active = false;
                session.has_stream = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put_negotiation(&self, negotiation: Negotiation) -> CoreResult<()> {
        self.negotiations
            .write()
            .await
            .insert(negotiation.negotiation_id.clone(), negotiation);
        Ok(())
    }

    async fn get_negotiation(&self, negotiation_id: &str) -> CoreResult<Option<Negotiation>> {
        Ok(self.negotiations.read().await.get(negotiation_id).cloned())
    }

    async fn put_task_execution(&self, execution: TaskExecution) -> CoreResult<()> {
        self.executions
            .write()
            .await
            .insert(execution.task_id.clone(), execution);
        Ok(())
    }

    async fn get_task_execution(&self, task_id: &str) -> CoreResult<Option<TaskExecution>> {
        Ok(self.executions.read().await.get(task_id).cloned())
    }

    async fn update_task_progress(
        &self,
        task_id: &str,
        progress: f64,
        status: Option<ExecutionStatus>,
    ) -> CoreResult<bool> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(task_id) {
            Some(execution) => {
                if progress > execution.progress {
                    execution.progress = progress.min(1.0);
                }
                if let Some(status) = status {
                    if !execution.status.is_terminal() {
                        execution.status = status;
                        if status == ExecutionStatus::Running && execution.started_at.is_none() {
                            execution.started_at = Some(Utc::now());
                        }
                        if status.is_terminal() {
                            execution.completed_at = Some(Utc::now());
                        }
                    }
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_task_execution(
        &self,
        task_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) -> CoreResult<bool> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(task_id) {
            Some(execution) => {
                if execution.status.is_terminal() {
                    return Ok(false);
                }
                execution.status = if error.is_some() {
                    ExecutionStatus::Failed
                } else {
                    ExecutionStatus::Completed
                };
                execution.result = result;
                execution.error = error;
                execution.completed_at = Some(Utc::now());
                if execution.status == ExecutionStatus::Completed {
                    execution.progress = 1.0;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cancel_task_execution(
        &self,
        task_id: &str,
        cancelled_by: &str,
        reason: Option<String>,
    ) -> CoreResult<bool> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(task_id) {
            Some(execution) => {
                if !execution.can_cancel || execution.status.is_terminal() {
                    return Ok(false);
                }
                execution.status = ExecutionStatus::Cancelled;
                execution.cancelled_by = Some(cancelled_by.to_string());
                execution.cancellation_reason = reason;
                execution.completed_at = Some(Utc::now());
                execution.can_cancel = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_session_tasks(
        &self,
        session_id: &str,
        status: Option<ExecutionStatus>,
    ) -> CoreResult<Vec<TaskExecution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.session_id == session_id)
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect())
    }

    async fn list_running_tasks(&self) -> CoreResult<Vec<TaskExecution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }
}

/// In-memory consent store.
#[derive(Default)]
pub struct InMemoryConsentStore {
    policies: RwLock<HashMap<(String, String), AccessPolicy>>,
    requests: RwLock<HashMap<Uuid, ConsentRequest>>,
    grants: RwLock<Vec<ConsentGrant>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl InMemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn put_policy(&self, policy: AccessPolicy) -> CoreResult<()> {
        self.policies.write().await.insert(
            (policy.resource_type.clone(), policy.resource_name.clone()),
            policy,
        );
        Ok(())
    }

    async fn get_policy(
        &self,
        resource_type: &str,
        resource_name: &str,
    ) -> CoreResult<Option<AccessPolicy>> {
        Ok(self
            .policies
            .read()
            .await
            .get(&(resource_type.to_string(), resource_name.to_string()))
            .cloned())
    }

    async fn put_request(&self, request: ConsentRequest) -> CoreResult<()> {
        self.requests.write().await.insert(request.id, request);
        Ok(())
    }

    async fn get_request(&self, request_id: Uuid) -> CoreResult<Option<ConsentRequest>> {
        Ok(self.requests.read().await.get(&request_id).cloned())
    }

    async fn put_grant(&self, grant: ConsentGrant) -> CoreResult<()> {
        self.grants.write().await.push(grant);
        Ok(())
    }

    async fn find_valid_grant(
        &self,
        user_id: &str,
        resource_type: &str,
        resource_name: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<ConsentGrant>> {
        let requests = self.requests.read().await;
        let grants = self.grants.read().await;
        let mut matching: Vec<&ConsentGrant> = grants
            .iter()
            .filter(|g| g.revoked_at.is_none() && g.expires_at > now)
            .filter(|g| {
                requests.get(&g.request_id).is_some_and(|r| {
                    r.user_id == user_id
                        && r.resource_type == resource_type
                        && r.resource_name == resource_name
                })
            })
            .collect();
        matching.sort_by_key(|g| g.granted_at);
        Ok(matching.last().map(|g| (*g).clone()))
    }

    async fn record_grant_use(&self, grant_id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        let mut grants = self.grants.write().await;
        if let Some(grant) = grants.iter_mut().find(|g| g.id == grant_id) {
            grant.usage_count += 1;
            grant.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn revoke_grant(&self, grant_id: Uuid, at: DateTime<Utc>) -> CoreResult<bool> {
        let mut grants = self.grants.write().await;
        match grants.iter_mut().find(|g| g.id == grant_id) {
            Some(grant) if grant.revoked_at.is_none() => {
                grant.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale_requests(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        use crate::domain::models::consent::ConsentStatus;

        let grants = self.grants.read().await;
        let expired_request_ids: Vec<Uuid> = grants
            .iter()
            .filter(|g| g.revoked_at.is_none() && g.expires_at <= now)
            .map(|g| g.request_id)
            .collect();
        drop(grants);

        let mut requests = self.requests.write().await;
        let mut changed = 0;
        for request_id in expired_request_ids {
            if let Some(request) = requests.get_mut(&request_id) {
                if request.status == ConsentStatus::Granted {
                    request.status = ConsentStatus::Expired;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn append_audit(&self, entry: AuditEntry) -> CoreResult<()> {
        self.audit.write().await.push(entry);
        Ok(())
    }

    async fn list_audit(&self, user_id: Option<&str>, limit: usize) -> CoreResult<Vec<AuditEntry>> {
        let audit = self.audit.read().await;
        let mut entries: Vec<AuditEntry> = audit
            .iter()
            .filter(|e| user_id.is_none_or(|u| e.user_id == u))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}
