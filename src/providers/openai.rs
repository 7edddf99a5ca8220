//! OpenAI chat-completions provider adapter.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::llm::{FinishReason, LlmRequest, LlmResponse};
use crate::domain::models::model_spec::{ModelId, ModelSpec};
use crate::domain::ports::ProviderAdapter;

use super::catalog;
use super::wire::{ChatCompletionRequest, ChatCompletionResponse, ChatErrorEnvelope};

const PROVIDER: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Configuration for the OpenAI adapter.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub default_max_tokens: u64,
    pub default_temperature: f64,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 120,
            default_max_tokens: 4096,
            default_temperature: 0.7,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Adapter for the OpenAI chat-completions API.
pub struct OpenAiAdapter {
    config: OpenAiConfig,
    client: Client,
    models: Vec<ModelSpec>,
}

impl OpenAiAdapter {
    pub fn new(config: OpenAiConfig) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::Validation(format!("http client: {e}")))?;
        Ok(Self {
            config,
            client,
            models: catalog::openai_models(),
        })
    }

    fn spec(&self, model_id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id.model() == model_id)
    }

    fn upstream(&self, model: &str, message: impl Into<String>) -> CoreError {
        CoreError::Upstream {
            provider: PROVIDER.to_string(),
            model: model.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: &LlmRequest) -> CoreResult<LlmResponse> {
        let model = request
            .model
            .as_ref()
            .map_or(DEFAULT_MODEL, |m| m.model())
            .to_string();
        let body = ChatCompletionRequest::from_request(
            request,
            &model,
            self.config.default_max_tokens,
            self.config.default_temperature,
        );

        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.upstream(&model, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.upstream(&model, e.to_string()))?;
        if !status.is_success() {
            let detail = serde_json::from_str::<ChatErrorEnvelope>(&text)
                .map_or(text.clone(), |e| e.error.message);
            return Err(self.upstream(&model, format!("HTTP {status}: {detail}")));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| self.upstream(&model, format!("invalid response body: {e}")))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.upstream(&model, "response contained no choices"))?;

        let usage = parsed.usage;
        let cost = self.cost(usage.prompt_tokens, usage.completion_tokens, &model);

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: ModelId::new(PROVIDER, &model),
            tokens_used: usage.total_tokens,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost_usd: cost,
            latency_ms,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map_or(FinishReason::Stop, FinishReason::parse),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(super::wire::ChatToolCall::into_tool_call)
                .collect(),
            metadata: std::collections::HashMap::from([(
                "usage".to_string(),
                serde_json::json!({
                    "prompt_tokens": usage.prompt_tokens,
                    "completion_tokens": usage.completion_tokens,
                    "total_tokens": usage.total_tokens,
                }),
            )]),
        })
    }

    fn list_models(&self) -> Vec<ModelSpec> {
        self.models.clone()
    }

    fn cost(&self, input_tokens: u64, output_tokens: u64, model_id: &str) -> f64 {
        match self.spec(model_id) {
            Some(spec) => spec.cost(input_tokens, output_tokens),
            None => {
                warn!(provider = PROVIDER, model = model_id, "unknown model for cost calculation");
                0.0
            }
        }
    }
}
