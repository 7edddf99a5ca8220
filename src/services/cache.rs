//! Two-tier response cache keyed by request fingerprint.
//!
//! The remote KV tier is used when reachable; a bounded in-process map
//! always backs it up. Keys hash the full request identity so that two
//! requests differing only in temperature never share an entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::CoreResult;
use crate::domain::models::llm::LlmResponse;
use crate::domain::ports::KvStore;

/// Soft cap on local entries; exceeding it evicts the oldest 20%.
const LOCAL_CAP: usize = 1000;
const EVICT_FRACTION: f64 = 0.2;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 3600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEntry {
    response: LlmResponse,
    expires_at: DateTime<Utc>,
}

/// Hit/miss counters, observable for dashboards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub local_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fingerprint-keyed LLM response cache.
pub struct ResponseCache {
    config: CacheConfig,
    remote: Option<Arc<dyn KvStore>>,
    local: Mutex<HashMap<String, CachedEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            config,
            remote,
            local: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn in_process(config: CacheConfig) -> Self {
        Self::new(config, None)
    }

    /// Deterministic key over the request identity. The full SHA-256
    /// digest is computed; the key string keeps 16 hex chars, enough
    /// for the keyspace while staying readable in KV dumps.
    pub fn cache_key(prompt: &str, model_id: &str, temperature: f64, max_tokens: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(b":");
        hasher.update(model_id.as_bytes());
        hasher.update(b":");
        hasher.update(temperature.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(max_tokens.to_string().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("llm_cache:{}", &hex[..16])
    }

    /// Return the cached response when an unexpired entry exists.
    pub async fn get(
        &self,
        prompt: &str,
        model_id: &str,
        temperature: f64,
        max_tokens: u64,
    ) -> Option<LlmResponse> {
        let key = Self::cache_key(prompt, model_id, temperature, max_tokens);

        if let Some(remote) = &self.remote {
            match remote.get(&key).await {
                Ok(Some(raw)) => {
                    if let Ok(entry) = serde_json::from_str::<CachedEntry>(&raw) {
                        if entry.expires_at > Utc::now() {
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %&key[..24.min(key.len())], "cache hit (remote)");
                            return Some(entry.response);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "remote cache read failed, falling back to local"),
            }
        }

        let mut local = self.local.lock().await;
        if let Some(entry) = local.get(&key) {
            if entry.expires_at > Utc::now() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %&key[..24.min(key.len())], "cache hit (local)");
                return Some(entry.response.clone());
            }
            local.remove(&key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write the response to both tiers with the configured TTL.
    pub async fn set(
        &self,
        prompt: &str,
        model_id: &str,
        temperature: f64,
        max_tokens: u64,
        response: &LlmResponse,
    ) -> CoreResult<()> {
        let key = Self::cache_key(prompt, model_id, temperature, max_tokens);
        let entry = CachedEntry {
            response: response.clone(),
            expires_at: Utc::now() + Duration::seconds(self.config.ttl_seconds as i64),
        };

        if let Some(remote) = &self.remote {
            let raw = serde_json::to_string(&entry)?;
            if let Err(e) = remote
                .set_with_ttl(&key, &raw, self.config.ttl_seconds)
                .await
            {
                warn!(error = %e, "remote cache write failed");
            }
        }

        let mut local = self.local.lock().await;
        local.insert(key, entry);

        if local.len() > LOCAL_CAP {
            let evict_count = (LOCAL_CAP as f64 * EVICT_FRACTION) as usize;
            let mut by_expiry: Vec<(String, DateTime<Utc>)> = local
                .iter()
                .map(|(k, v)| (k.clone(), v.expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, expires)| *expires);
            for (key, _) in by_expiry.into_iter().take(evict_count) {
                local.remove(&key);
            }
        }
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            local_entries: self.local.lock().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::llm::FinishReason;
    use crate::domain::models::model_spec::ModelId;

    fn response(content: &str) -> LlmResponse {
        LlmResponse {
            content: content.into(),
            model: ModelId::new("mock", "m"),
            tokens_used: 10,
            input_tokens: 5,
            output_tokens: 5,
            cost_usd: 0.001,
            latency_ms: 12.0,
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn keys_differ_by_temperature() {
        let a = ResponseCache::cache_key("p", "m", 0.0, 256);
        let b = ResponseCache::cache_key("p", "m", 0.7, 256);
        assert_ne!(a, b);
        assert!(a.starts_with("llm_cache:"));
        assert_eq!(a.len(), "llm_cache:".len() + 16);
    }

    #[tokio::test]
    async fn set_then_get_within_ttl() {
        let cache = ResponseCache::in_process(CacheConfig { ttl_seconds: 60 });
        cache.set("p", "m", 0.0, 256, &response("cached")).await.unwrap();

        let hit = cache.get("p", "m", 0.0, 256).await.unwrap();
        assert_eq!(hit.content, "cached");

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = ResponseCache::in_process(CacheConfig { ttl_seconds: 0 });
        cache.set("p", "m", 0.0, 256, &response("stale")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(cache.get("p", "m", 0.0, 256).await.is_none());
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn different_params_are_distinct_entries() {
        let cache = ResponseCache::in_process(CacheConfig::default());
        cache.set("p", "m", 0.0, 256, &response("cold")).await.unwrap();
        assert!(cache.get("p", "m", 0.9, 256).await.is_none());
        assert!(cache.get("p", "m", 0.0, 512).await.is_none());
        assert!(cache.get("p", "m", 0.0, 256).await.is_some());
    }

    #[tokio::test]
    async fn hit_rate_computation() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            local_entries: 0,
        };
        assert!((stats.hit_rate() - 0.75).abs() < 1e-9);
    }
}
