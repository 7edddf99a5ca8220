//! Environment-backed configuration.
//!
//! All §"environment inputs" load once at start: provider keys, default
//! generation knobs, KV url, session expiry windows, rate-limit caps,
//! and cache TTL. Variables use the `HIVEMIND_` prefix; absent provider
//! keys disable the corresponding adapter.

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid temperature: {0}. Must be in [0, 2]")]
    InvalidTemperature(f64),

    #[error("Invalid max_tokens: {0}. Cannot be 0")]
    InvalidMaxTokens(u64),

    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(u64),

    #[error("Invalid cache TTL: {0}. Cannot be 0")]
    InvalidCacheTtl(u64),

    #[error("Invalid session expiry: {0}. Must be positive")]
    InvalidSessionExpiry(i64),

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

/// Top-level configuration for the orchestrator core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// OpenAI API key; adapter disabled when absent.
    pub openai_api_key: Option<String>,
    /// Anthropic API key; adapter disabled when absent.
    pub anthropic_api_key: Option<String>,
    /// Groq API key; adapter disabled when absent.
    pub groq_api_key: Option<String>,

    /// Default model when neither request nor policy decides.
    pub default_model: String,
    pub default_max_tokens: u64,
    pub default_temperature: f64,

    /// Remote KV url for the shared cache/limiter tier; local-only when
    /// absent.
    pub kv_url: Option<String>,

    pub mcp_session_ttl_minutes: i64,
    pub a2a_session_ttl_hours: i64,

    pub rate_limit_requests_per_minute: u64,
    pub rate_limit_requests_per_hour: u64,
    pub rate_limit_cost_per_hour_usd: f64,

    pub cache_ttl_seconds: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            groq_api_key: None,
            default_model: "openai/gpt-4.1-mini".to_string(),
            default_max_tokens: 4096,
            default_temperature: 0.7,
            kv_url: None,
            mcp_session_ttl_minutes: 30,
            a2a_session_ttl_hours: 1,
            rate_limit_requests_per_minute: 60,
            rate_limit_requests_per_hour: 1000,
            rate_limit_cost_per_hour_usd: 100.0,
            cache_ttl_seconds: 3600,
        }
    }
}

impl CoreConfig {
    /// Load from defaults merged with `HIVEMIND_*` environment
    /// variables, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("HIVEMIND_"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::InvalidTemperature(self.default_temperature));
        }
        if self.default_max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(self.default_max_tokens));
        }
        if self.rate_limit_requests_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit(
                self.rate_limit_requests_per_minute,
            ));
        }
        if self.rate_limit_requests_per_hour == 0 {
            return Err(ConfigError::InvalidRateLimit(
                self.rate_limit_requests_per_hour,
            ));
        }
        if self.cache_ttl_seconds == 0 {
            return Err(ConfigError::InvalidCacheTtl(self.cache_ttl_seconds));
        }
        if self.mcp_session_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidSessionExpiry(
                self.mcp_session_ttl_minutes,
            ));
        }
        if self.a2a_session_ttl_hours <= 0 {
            return Err(ConfigError::InvalidSessionExpiry(self.a2a_session_ttl_hours));
        }
        Ok(())
    }

    /// Providers with keys present, in registration order.
    pub fn enabled_providers(&self) -> Vec<&'static str> {
        let mut providers = Vec::new();
        if self.openai_api_key.is_some() {
            providers.push("openai");
        }
        if self.anthropic_api_key.is_some() {
            providers.push("anthropic");
        }
        if self.groq_api_key.is_some() {
            providers.push("groq");
        }
        providers
    }
}
