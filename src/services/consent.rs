//! Consent gate: policy-bound access checks ahead of every tool dispatch.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::consent::{
    AccessDecision, AuditAction, AuditEntry, ConsentGrant, ConsentRequest, ConsentStatus,
};
use crate::domain::models::session::NetworkOrigin;
use crate::domain::ports::ConsentStore;

use super::rate_limit::RateLimiter;

/// Gate evaluated before any MCP or A2A tool dispatch.
pub struct ConsentGate {
    store: Arc<dyn ConsentStore>,
    /// Usage ceilings piggyback on the limiter keyed `(user, resource)`.
    limiter: Arc<RateLimiter>,
}

impl ConsentGate {
    pub fn new(store: Arc<dyn ConsentStore>, limiter: Arc<RateLimiter>) -> Self {
        Self { store, limiter }
    }

    /// Evaluate access for `user` against `(resource_type, resource_name)`.
    ///
    /// The decision is returned rather than raised so callers can map a
    /// denial to their protocol's error shape; they must honor it.
    pub async fn check_access(
        &self,
        user_id: &str,
        resource_type: &str,
        resource_name: &str,
        permissions: &[String],
        origin: &NetworkOrigin,
    ) -> CoreResult<AccessDecision> {
        let policy = match self.store.get_policy(resource_type, resource_name).await? {
            Some(policy) => policy,
            None => {
                self.audit(
                    user_id,
                    AuditAction::Error,
                    resource_type,
                    resource_name,
                    json!({ "error": "No access policy found" }),
                    origin,
                )
                .await;
                return Ok(AccessDecision {
                    allowed: false,
                    reason: "No access policy defined".into(),
                    grant_id: None,
                });
            }
        };

        let missing: Vec<&String> = policy
            .required_permissions
            .iter()
            .filter(|required| !permissions.contains(required))
            .collect();
        if !missing.is_empty() {
            self.audit(
                user_id,
                AuditAction::Deny,
                resource_type,
                resource_name,
                json!({ "missing_permissions": missing }),
                origin,
            )
            .await;
            return Ok(AccessDecision {
                allowed: false,
                reason: format!(
                    "Missing permissions: {}",
                    missing
                        .iter()
                        .map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                grant_id: None,
            });
        }

        let grant_id = if policy.auto_approve {
            None
        } else {
            match self
                .store
                .find_valid_grant(user_id, resource_type, resource_name, Utc::now())
                .await?
            {
                Some(grant) => {
                    self.store.record_grant_use(grant.id, Utc::now()).await?;
                    Some(grant.id)
                }
                None => {
                    self.audit(
                        user_id,
                        AuditAction::Deny,
                        resource_type,
                        resource_name,
                        json!({ "error": "No valid consent found" }),
                        origin,
                    )
                    .await;
                    return Ok(AccessDecision {
                        allowed: false,
                        reason: "No valid consent found".into(),
                        grant_id: None,
                    });
                }
            }
        };

        if let Some(max_per_hour) = policy.max_usage_per_hour {
            let resource = format!("{resource_type}:{resource_name}");
            let (_, info) = self.limiter.check(user_id, &resource, 0.0).await;
            if info.hour_count > max_per_hour {
                warn!(
                    user = user_id,
                    resource = %resource,
                    count = info.hour_count,
                    limit = max_per_hour,
                    "usage ceiling exceeded"
                );
                self.audit(
                    user_id,
                    AuditAction::Deny,
                    resource_type,
                    resource_name,
                    json!({ "hour_count": info.hour_count, "max_usage_per_hour": max_per_hour }),
                    origin,
                )
                .await;
                return Ok(AccessDecision {
                    allowed: false,
                    reason: format!("Usage limit exceeded: {max_per_hour} per hour"),
                    grant_id,
                });
            }
        }

        self.audit(
            user_id,
            AuditAction::Access,
            resource_type,
            resource_name,
            json!({ "permissions": permissions, "grant_id": grant_id.map(|g| g.to_string()) }),
            origin,
        )
        .await;
        Ok(AccessDecision {
            allowed: true,
            reason: "Access granted".into(),
            grant_id,
        })
    }

    /// File a consent request on behalf of a user.
    pub async fn create_request(
        &self,
        user_id: &str,
        resource_type: &str,
        resource_name: &str,
        permissions: Vec<String>,
        requested_ttl_seconds: u64,
    ) -> CoreResult<ConsentRequest> {
        let request = ConsentRequest::new(
            user_id,
            resource_type,
            resource_name,
            permissions,
            requested_ttl_seconds,
        );
        self.store.put_request(request.clone()).await?;
        self.audit(
            user_id,
            AuditAction::Request,
            resource_type,
            resource_name,
            json!({ "request_id": request.id.to_string() }),
            &NetworkOrigin::default(),
        )
        .await;
        Ok(request)
    }

    /// Grant a pending request, producing a TTL-bounded grant.
    pub async fn grant(&self, request_id: Uuid, granted_by: &str) -> CoreResult<ConsentGrant> {
        let mut request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("ConsentRequest", request_id.to_string()))?;
        request.status = ConsentStatus::Granted;
        self.store.put_request(request.clone()).await?;

        let grant = ConsentGrant::new(&request, granted_by);
        self.store.put_grant(grant.clone()).await?;
        self.audit(
            &request.user_id,
            AuditAction::Grant,
            &request.resource_type,
            &request.resource_name,
            json!({ "grant_id": grant.id.to_string(), "granted_by": granted_by }),
            &NetworkOrigin::default(),
        )
        .await;
        info!(user = %request.user_id, resource = %request.resource_name, "consent granted");
        Ok(grant)
    }

    /// Mark granted requests whose grants have lapsed as expired.
    pub async fn cleanup_expired(&self) -> CoreResult<usize> {
        self.store.expire_stale_requests(Utc::now()).await
    }

    pub async fn revoke(&self, grant_id: Uuid, user_id: &str) -> CoreResult<bool> {
        let revoked = self.store.revoke_grant(grant_id, Utc::now()).await?;
        if revoked {
            self.audit(
                user_id,
                AuditAction::Revoke,
                "grant",
                &grant_id.to_string(),
                json!({}),
                &NetworkOrigin::default(),
            )
            .await;
        }
        Ok(revoked)
    }

    async fn audit(
        &self,
        user_id: &str,
        action: AuditAction,
        resource_type: &str,
        resource_name: &str,
        details: serde_json::Value,
        origin: &NetworkOrigin,
    ) {
        let mut entry = AuditEntry::new(user_id, action, resource_type, resource_name)
            .with_details(details);
        entry.origin = origin.clone();
        if let Err(e) = self.store.append_audit(entry).await {
            warn!(error = %e, "failed to append audit entry");
        }
    }
}
