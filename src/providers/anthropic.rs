//! Anthropic messages-style provider adapter.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::llm::{FinishReason, LlmRequest, LlmResponse, ToolCall};
use crate::domain::models::model_spec::{ModelId, ModelSpec};
use crate::domain::ports::ProviderAdapter;

use super::catalog;

const PROVIDER: &str = "anthropic";
const DEFAULT_MODEL: &str = "claude-3.5-sonnet";

/// Configuration for the Anthropic adapter.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
    pub default_max_tokens: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            timeout_secs: 120,
            default_max_tokens: 4096,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u64,
    messages: Vec<MessageBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Adapter for the Anthropic Messages API.
pub struct AnthropicAdapter {
    config: AnthropicConfig,
    client: Client,
    models: Vec<ModelSpec>,
}

impl AnthropicAdapter {
    pub fn new(config: AnthropicConfig) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::Validation(format!("http client: {e}")))?;
        Ok(Self {
            config,
            client,
            models: catalog::anthropic_models(),
        })
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
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: &LlmRequest) -> CoreResult<LlmResponse> {
        let model = request
            .model
            .as_ref()
            .map_or(DEFAULT_MODEL, |m| m.model())
            .to_string();

        let body = MessagesRequest {
            model: model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.config.default_max_tokens),
            messages: vec![MessageBody {
                role: "user",
                content: request.prompt.clone(),
            }],
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: if request.stop_sequences.is_empty() {
                None
            } else {
                Some(request.stop_sequences.clone())
            },
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(
                    request
                        .tools
                        .iter()
                        .map(|t| AnthropicTool {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            input_schema: t.parameters.clone(),
                        })
                        .collect(),
                )
            },
        };

        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header(header::CONTENT_TYPE, "application/json")
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
            let detail = serde_json::from_str::<ErrorEnvelope>(&text)
                .map_or(text.clone(), |e| e.error.message);
            return Err(self.upstream(&model, format!("HTTP {status}: {detail}")));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| self.upstream(&model, format!("invalid response body: {e}")))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
            }
        }

        let usage = parsed.usage;
        let cost = self.cost(usage.input_tokens, usage.output_tokens, &model);

        Ok(LlmResponse {
            content,
            model: ModelId::new(PROVIDER, &model),
            tokens_used: usage.input_tokens + usage.output_tokens,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: cost,
            latency_ms,
            finish_reason: parsed
                .stop_reason
                .as_deref()
                .map_or(FinishReason::Stop, FinishReason::parse),
            tool_calls,
            metadata: std::collections::HashMap::from([(
                "usage".to_string(),
                serde_json::json!({
                    "input_tokens": usage.input_tokens,
                    "output_tokens": usage.output_tokens,
                }),
            )]),
        })
    }

    fn list_models(&self) -> Vec<ModelSpec> {
        self.models.clone()
    }

    fn cost(&self, input_tokens: u64, output_tokens: u64, model_id: &str) -> f64 {
        match self.models.iter().find(|m| m.id.model() == model_id) {
            Some(spec) => spec.cost(input_tokens, output_tokens),
            None => {
                warn!(provider = PROVIDER, model = model_id, "unknown model for cost calculation");
                0.0
            }
        }
    }
}
