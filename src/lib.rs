//! Hivemind: an AI workforce orchestrator core.
//!
//! The crate accepts high-level goals, decomposes them into agent task
//! graphs, dispatches tasks to heterogeneous LLM providers under a
//! cost/latency/quality policy, fans prompts out into parallel
//! variations with collapse strategies, and manages MCP/A2A sessions
//! with streaming progress and consent-gated tool access.
//!
//! # Layout
//!
//! - [`domain`] — data model, errors, and the port traits at the seams
//! - [`providers`] — one adapter per LLM vendor plus a scripted mock
//! - [`services`] — registry, router, cache, rate limiter, agent
//!   runtime, workflow orchestrator, quantum executor, session manager,
//!   consent gate, configuration, logging
//! - [`adapters`] — in-memory implementations of the storage ports
//!
//! # Wiring example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hivemind::providers::{OpenAiAdapter, OpenAiConfig};
//! use hivemind::services::{
//!     AgentRuntime, AgentRuntimeConfig, CacheConfig, CoreConfig, ModelRegistry, ModelRouter,
//!     RateLimitConfig, RateLimiter, RegistryConfig, ResponseCache, WorkflowOrchestrator,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::load()?;
//! let openai = Arc::new(OpenAiAdapter::new(OpenAiConfig::new(
//!     config.openai_api_key.clone().unwrap_or_default(),
//! ))?);
//!
//! let registry = Arc::new(ModelRegistry::new(vec![openai], &RegistryConfig::default())?);
//! let cache = Arc::new(ResponseCache::in_process(CacheConfig::default()));
//! let limiter = Arc::new(RateLimiter::in_process(RateLimitConfig::default()));
//! let router = Arc::new(ModelRouter::new(registry, cache, limiter));
//! let runtime = Arc::new(AgentRuntime::new(router, AgentRuntimeConfig::default()));
//! let orchestrator = WorkflowOrchestrator::new(runtime);
//! # let _ = orchestrator;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod domain;
pub mod providers;
pub mod services;

pub use domain::errors::{CoreError, CoreResult};
pub use domain::models;
pub use domain::ports;
