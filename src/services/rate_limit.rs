//! Windowed rate limiting per two-part scope.
//!
//! Scopes are `(a, b)` pairs: `(provider, model)` for LLM traffic,
//! `(user, resource)` when the consent gate piggybacks on the limiter.
//! Counters are incremented before the caps are compared and stay
//! incremented on denial, so a rejected caller still burns budget.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::domain::ports::KvStore;

/// Caps applied to every scope.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u64,
    pub requests_per_hour: u64,
    pub cost_limit_per_hour_usd: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            cost_limit_per_hour_usd: 100.0,
        }
    }
}

/// Snapshot returned with every admission decision.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub minute_count: u64,
    pub hour_count: u64,
    pub hour_cost_usd: f64,
    pub requests_per_minute: u64,
    pub requests_per_hour: u64,
    pub cost_limit_per_hour_usd: f64,
}

#[derive(Debug, Default, Clone)]
struct LocalWindows {
    minute_window: i64,
    minute_count: u64,
    hour_window: i64,
    hour_count: u64,
    hour_cost: f64,
}

/// Per-scope usage totals fed by `record_usage`; observability only.
#[derive(Debug, Default, Clone, Serialize)]
pub struct UsageTotals {
    pub requests: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Sliding-window rate limiter with a remote tier and a mutex-guarded
/// local fallback.
pub struct RateLimiter {
    config: RateLimitConfig,
    remote: Option<Arc<dyn KvStore>>,
    local: Mutex<HashMap<String, LocalWindows>>,
    usage: Mutex<HashMap<String, UsageTotals>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, remote: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            config,
            remote,
            local: Mutex::new(HashMap::new()),
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_process(config: RateLimitConfig) -> Self {
        Self::new(config, None)
    }

    /// Atomically account for one request and decide admission.
    ///
    /// On internal failure of the limiter itself the call is allowed
    /// (fail-open) and the failure is logged.
    pub async fn check(&self, scope_a: &str, scope_b: &str, estimated_cost: f64) -> (bool, RateLimitInfo) {
        match self.check_inner(scope_a, scope_b, estimated_cost).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = %e, scope = %format!("{scope_a}:{scope_b}"), "rate limit check failed, allowing request");
                (
                    true,
                    RateLimitInfo {
                        minute_count: 0,
                        hour_count: 0,
                        hour_cost_usd: 0.0,
                        requests_per_minute: self.config.requests_per_minute,
                        requests_per_hour: self.config.requests_per_hour,
                        cost_limit_per_hour_usd: self.config.cost_limit_per_hour_usd,
                    },
                )
            }
        }
    }

    async fn check_inner(
        &self,
        scope_a: &str,
        scope_b: &str,
        estimated_cost: f64,
    ) -> Result<(bool, RateLimitInfo), crate::domain::errors::CoreError> {
        let now = chrono::Utc::now().timestamp();
        let minute_window = now / 60;
        let hour_window = now / 3600;
        let key_base = format!("rate_limit:{scope_a}:{scope_b}");

        let (minute_count, hour_count, hour_cost) = if let Some(remote) = &self.remote {
            let minute_key = format!("{key_base}:minute:{minute_window}");
            let hour_key = format!("{key_base}:hour:{hour_window}");
            let cost_key = format!("{key_base}:cost:{hour_window}");
            let minute_count = remote.incr_by(&minute_key, 1.0, 60).await? as u64;
            let hour_count = remote.incr_by(&hour_key, 1.0, 3600).await? as u64;
            let hour_cost = remote.incr_by(&cost_key, estimated_cost, 3600).await?;
            (minute_count, hour_count, hour_cost)
        } else {
            let mut local = self.local.lock().await;
            let windows = local.entry(key_base).or_default();
            if windows.minute_window != minute_window {
                windows.minute_window = minute_window;
                windows.minute_count = 0;
            }
            if windows.hour_window != hour_window {
                windows.hour_window = hour_window;
                windows.hour_count = 0;
                windows.hour_cost = 0.0;
            }
            windows.minute_count += 1;
            windows.hour_count += 1;
            windows.hour_cost += estimated_cost;
            (windows.minute_count, windows.hour_count, windows.hour_cost)
        };

        let info = RateLimitInfo {
            minute_count,
            hour_count,
            hour_cost_usd: hour_cost,
            requests_per_minute: self.config.requests_per_minute,
            requests_per_hour: self.config.requests_per_hour,
            cost_limit_per_hour_usd: self.config.cost_limit_per_hour_usd,
        };

        if minute_count > self.config.requests_per_minute {
            warn!(scope_a, scope_b, count = minute_count, "rate limit exceeded (per minute)");
            return Ok((false, info));
        }
        if hour_count > self.config.requests_per_hour {
            warn!(scope_a, scope_b, count = hour_count, "rate limit exceeded (per hour)");
            return Ok((false, info));
        }
        if hour_cost > self.config.cost_limit_per_hour_usd {
            warn!(scope_a, scope_b, cost = hour_cost, "cost limit exceeded");
            return Ok((false, info));
        }
        Ok((true, info))
    }

    /// Record actual usage for dashboards. Never gates traffic.
    pub async fn record_usage(&self, scope_a: &str, scope_b: &str, actual_cost: f64, tokens: u64) {
        let hour_window = chrono::Utc::now().timestamp() / 3600;
        let key = format!("usage:{scope_a}:{scope_b}:{hour_window}");
        let mut usage = self.usage.lock().await;
        let totals = usage.entry(key).or_default();
        totals.requests += 1;
        totals.tokens += tokens;
        totals.cost_usd += actual_cost;
        debug!(scope_a, scope_b, cost = actual_cost, tokens, "usage recorded");
    }

    /// Current usage totals keyed by `usage:<a>:<b>:<hour>`.
    pub async fn usage_snapshot(&self) -> HashMap<String, UsageTotals> {
        self.usage.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u64, per_hour: u64, cost_cap: f64) -> RateLimiter {
        RateLimiter::in_process(RateLimitConfig {
            requests_per_minute: per_minute,
            requests_per_hour: per_hour,
            cost_limit_per_hour_usd: cost_cap,
        })
    }

    #[tokio::test]
    async fn admits_until_minute_cap() {
        let limiter = limiter(3, 100, 100.0);
        for _ in 0..3 {
            let (allowed, _) = limiter.check("openai", "gpt-4.1", 0.0).await;
            assert!(allowed);
        }
        let (allowed, info) = limiter.check("openai", "gpt-4.1", 0.0).await;
        assert!(!allowed);
        // The denied request still incremented the counters.
        assert_eq!(info.minute_count, 4);
    }

    #[tokio::test]
    async fn cost_cap_denies() {
        let limiter = limiter(100, 100, 1.0);
        let (allowed, _) = limiter.check("openai", "gpt-4.1", 0.6).await;
        assert!(allowed);
        let (allowed, info) = limiter.check("openai", "gpt-4.1", 0.6).await;
        assert!(!allowed);
        assert!(info.hour_cost_usd > 1.0);
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let limiter = limiter(1, 100, 100.0);
        let (allowed, _) = limiter.check("openai", "gpt-4.1", 0.0).await;
        assert!(allowed);
        let (allowed, _) = limiter.check("openai", "gpt-4.1-mini", 0.0).await;
        assert!(allowed);
        let (allowed, _) = limiter.check("openai", "gpt-4.1", 0.0).await;
        assert!(!allowed);
    }

    #[tokio::test]
    async fn usage_recording_never_gates() {
        let limiter = limiter(1, 1, 0.1);
        limiter.record_usage("openai", "gpt-4.1", 50.0, 10_000).await;
        let (allowed, _) = limiter.check("openai", "gpt-4.1", 0.0).await;
        assert!(allowed);

        let snapshot = limiter.usage_snapshot().await;
        let totals = snapshot.values().next().unwrap();
        assert_eq!(totals.requests, 1);
        assert_eq!(totals.tokens, 10_000);
    }
}
