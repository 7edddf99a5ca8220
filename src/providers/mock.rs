//! Scripted provider for tests.

use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::llm::{FinishReason, LlmRequest, LlmResponse};
use crate::domain::models::model_spec::{Capability, ModelId, ModelSpec};
use crate::domain::ports::ProviderAdapter;

/// One scripted behavior for the next call.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Respond with the given content at a fixed cost and latency.
    Respond {
        content: String,
        cost_usd: f64,
        tokens: u64,
    },
    /// Fail with an upstream error.
    Fail(String),
}

/// Provider adapter driven by a queue of scripted behaviors.
///
/// When the queue runs dry it answers with a default echo response so
/// happy-path tests need no scripting at all.
pub struct MockProvider {
    provider: String,
    models: Vec<ModelSpec>,
    script: Mutex<VecDeque<MockBehavior>>,
    requests: Mutex<Vec<LlmRequest>>,
    call_count: AtomicU64,
    /// Fixed per-call cost used by unscripted responses.
    pub default_cost_usd: f64,
    /// Simulated work duration before responding.
    pub response_delay: Duration,
}

impl MockProvider {
    pub fn new(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        let models = vec![mock_spec(&provider, "mock-model")];
        Self {
            provider,
            models,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicU64::new(0),
            default_cost_usd: 0.001,
            response_delay: Duration::ZERO,
        }
    }

    pub fn with_models(mut self, models: Vec<ModelSpec>) -> Self {
        self.models = models;
        self
    }

    pub fn with_default_cost(mut self, cost_usd: f64) -> Self {
        self.default_cost_usd = cost_usd;
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Queue the next behavior. Behaviors are consumed in FIFO order.
    pub fn push_behavior(&self, behavior: MockBehavior) {
        self.script.lock().unwrap().push_back(behavior);
    }

    pub fn push_response(&self, content: impl Into<String>) {
        self.push_behavior(MockBehavior::Respond {
            content: content.into(),
            cost_usd: self.default_cost_usd,
            tokens: 42,
        });
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.push_behavior(MockBehavior::Fail(message.into()));
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in call order.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Build a minimal text-generation spec for a mock model.
pub fn mock_spec(provider: &str, model: &str) -> ModelSpec {
    let capabilities: BTreeSet<Capability> = [
        Capability::TextGeneration,
        Capability::FunctionCalling,
        Capability::StructuredOutput,
    ]
    .into_iter()
    .collect();
    ModelSpec {
        id: ModelId::new(provider, model),
        name: model.to_string(),
        description: "mock".into(),
        capabilities,
        context_window: 128_000,
        max_output_tokens: 8_192,
        input_cost_per_mtok: 1.0,
        output_cost_per_mtok: 2.0,
        avg_latency_ms: Some(10.0),
        quality_score: Some(0.5),
        knowledge_cutoff: None,
        is_reasoning: false,
        is_multimodal: false,
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn generate(&self, request: &LlmRequest) -> CoreResult<LlmResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }

        let behavior = self.script.lock().unwrap().pop_front();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.models[0].id.clone());

        match behavior {
            Some(MockBehavior::Fail(message)) => Err(CoreError::Upstream {
                provider: self.provider.clone(),
                model: model.model().to_string(),
                message,
            }),
            Some(MockBehavior::Respond {
                content,
                cost_usd,
                tokens,
            }) => Ok(response(model, content, cost_usd, tokens)),
            None => Ok(response(
                model,
                format!("echo: {}", request.prompt),
                self.default_cost_usd,
                42,
            )),
        }
    }

    fn list_models(&self) -> Vec<ModelSpec> {
        self.models.clone()
    }

    fn cost(&self, input_tokens: u64, output_tokens: u64, model_id: &str) -> f64 {
        self.models
            .iter()
            .find(|m| m.id.model() == model_id)
            .map_or(0.0, |spec| spec.cost(input_tokens, output_tokens))
    }
}

fn response(model: ModelId, content: String, cost_usd: f64, tokens: u64) -> LlmResponse {
    LlmResponse {
        content,
        model,
        tokens_used: tokens,
        input_tokens: tokens / 2,
        output_tokens: tokens - tokens / 2,
        cost_usd,
        latency_ms: 10.0,
        finish_reason: FinishReason::Stop,
        tool_calls: Vec::new(),
        metadata: std::collections::HashMap::new(),
    }
}
