//! Shared harness for integration tests: a scripted provider wired
//! through registry, router, runtime, and orchestrator.
#![allow(dead_code)]

use std::sync::Arc;

use hivemind::adapters::{InMemoryConsentStore, InMemorySessionStore};
use hivemind::domain::models::consent::AccessPolicy;
use hivemind::domain::models::model_spec::ModelSpec;
use hivemind::domain::ports::{ConsentStore, SessionStore};
use hivemind::providers::{mock_spec, MockProvider};
use hivemind::services::{
    AgentRuntime, AgentRuntimeConfig, CacheConfig, ConsentGate, ModelRegistry, ModelRouter,
    RateLimitConfig, RateLimiter, RegistryConfig, ResponseCache, SessionManager,
    SessionManagerConfig, WorkflowOrchestrator,
};

pub struct Harness {
    pub provider: Arc<MockProvider>,
    pub registry: Arc<ModelRegistry>,
    pub cache: Arc<ResponseCache>,
    pub limiter: Arc<RateLimiter>,
    pub router: Arc<ModelRouter>,
    pub runtime: Arc<AgentRuntime>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_specs(vec![mock_spec("mock", "mock-model")])
    }

    pub fn with_specs(specs: Vec<ModelSpec>) -> Self {
        let provider = Arc::new(MockProvider::new("mock").with_models(specs));
        Self::from_provider(provider)
    }

    pub fn from_provider(provider: Arc<MockProvider>) -> Self {
        let registry = Arc::new(
            ModelRegistry::new(vec![provider.clone()], &RegistryConfig::unchecked())
                .expect("registry"),
        );
        let cache = Arc::new(ResponseCache::in_process(CacheConfig::default()));
        let limiter = Arc::new(RateLimiter::in_process(RateLimitConfig::default()));
        let router = Arc::new(ModelRouter::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&limiter),
        ));
        let runtime = Arc::new(AgentRuntime::new(
            Arc::clone(&router),
            AgentRuntimeConfig {
                retry_base_ms: 1,
                retry_cap_ms: 5,
            },
        ));
        Self {
            provider,
            registry,
            cache,
            limiter,
            router,
            runtime,
        }
    }

    pub fn orchestrator(&self) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(Arc::clone(&self.runtime))
    }

    pub fn orchestrator_with_cache(&self) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(Arc::clone(&self.runtime)).with_cache(true)
    }
}

/// Session-layer harness: manager + stores with auto-approved tool
/// policies for the built-in tool set.
pub struct SessionHarness {
    pub manager: Arc<SessionManager>,
    pub session_store: Arc<InMemorySessionStore>,
    pub consent_store: Arc<InMemoryConsentStore>,
}

impl SessionHarness {
    pub async fn new() -> Self {
        Self::with_config(SessionManagerConfig {
            stream_step_delay_ms: 50,
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: SessionManagerConfig) -> Self {
        let session_store = Arc::new(InMemorySessionStore::new());
        let consent_store = Arc::new(InMemoryConsentStore::new());
        for tool in ["execute_agent", "create_workflow", "analyze_system"] {
            consent_store
                .put_policy(AccessPolicy {
                    resource_type: "tool".into(),
                    resource_name: tool.into(),
                    required_permissions: vec!["execute".into()],
                    auto_approve: true,
                    max_usage_per_hour: None,
                })
                .await
                .expect("policy");
        }
        let gate = Arc::new(ConsentGate::new(
            Arc::clone(&consent_store) as Arc<dyn ConsentStore>,
            Arc::new(RateLimiter::in_process(RateLimitConfig::default())),
        ));
        let manager = SessionManager::new(
            Arc::clone(&session_store) as Arc<dyn SessionStore>,
            gate,
            config,
        )
        .await
        .expect("session manager");
        Self {
            manager: Arc::new(manager),
            session_store,
            consent_store,
        }
    }
}
