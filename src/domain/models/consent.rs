//! Consent and access-control domain models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::session::NetworkOrigin;

/// Declarative access policy for one `(resource_type, resource_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub resource_type: String,
    pub resource_name: String,
    #[serde(default)]
    pub required_permissions: Vec<String>,
    /// Grant a transient consent without an explicit grant record.
    #[serde(default)]
    pub auto_approve: bool,
    /// Per-user hourly access ceiling, enforced via the rate limiter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_usage_per_hour: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Granted,
    Denied,
    Expired,
    Revoked,
}

/// A user's request for access to a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub id: Uuid,
    pub user_id: String,
    pub resource_type: String,
    pub resource_name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub requested_ttl_seconds: u64,
    pub status: ConsentStatus,
    pub created_at: DateTime<Utc>,
}

impl ConsentRequest {
    pub fn new(
        user_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
        permissions: Vec<String>,
        requested_ttl_seconds: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            permissions,
            requested_ttl_seconds,
            status: ConsentStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// A time-bounded authorization for one `(user, resource)` pair.
///
/// Grants outlive the session that created them, up to their TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentGrant {
    pub id: Uuid,
    pub request_id: Uuid,
    pub granted_by: String,
    #[serde(default)]
    pub granted_permissions: Vec<String>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ConsentGrant {
    pub fn new(request: &ConsentRequest, granted_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request_id: request.id,
            granted_by: granted_by.into(),
            granted_permissions: request.permissions.clone(),
            granted_at: now,
            expires_at: now + Duration::seconds(request.requested_ttl_seconds as i64),
            usage_count: 0,
            last_used_at: None,
            revoked_at: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.revoked_at.is_none() && Utc::now() < self.expires_at
    }
}

/// Outcome recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Request,
    Grant,
    Deny,
    Access,
    Revoke,
    Error,
}

/// One audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default)]
    pub origin: NetworkOrigin,
}

impl AuditEntry {
    pub fn new(
        user_id: impl Into<String>,
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            action,
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            request_id: None,
            timestamp: Utc::now(),
            details: None,
            origin: NetworkOrigin::default(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Decision returned by the consent gate. The caller must honor a denial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_validity_window() {
        let request = ConsentRequest::new("user-1", "tool", "execute_agent", vec![], 3600);
        let grant = ConsentGrant::new(&request, "admin");
        assert!(grant.is_valid());
        assert_eq!(grant.request_id, request.id);
    }

    #[test]
    fn revoked_grant_is_invalid() {
        let request = ConsentRequest::new("user-1", "tool", "execute_agent", vec![], 3600);
        let mut grant = ConsentGrant::new(&request, "admin");
        grant.revoked_at = Some(Utc::now());
        assert!(!grant.is_valid());
    }

    #[test]
    fn zero_ttl_grant_expires_immediately() {
        let request = ConsentRequest::new("user-1", "tool", "execute_agent", vec![], 0);
        let grant = ConsentGrant::new(&request, "admin");
        assert!(!grant.is_valid());
    }

    #[test]
    fn audit_entry_serde() {
        let entry = AuditEntry::new("user-1", AuditAction::Access, "tool", "execute_agent")
            .with_details(serde_json::json!({ "permissions": ["execute"] }));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"access\""));
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, AuditAction::Access);
    }
}
