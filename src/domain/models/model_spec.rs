//! Model catalog domain types.
//!
//! A [`ModelSpec`] is the routing contract for one model: its capability
//! set and unit costs drive every selection decision, so tests can swap
//! in an arbitrary registry built from these types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::CoreError;

/// Capability advertised by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    FunctionCalling,
    StructuredOutput,
    Vision,
    Reasoning,
    Embeddings,
    LongContext,
    Streaming,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextGeneration => "text_generation",
            Self::FunctionCalling => "function_calling",
            Self::StructuredOutput => "structured_output",
            Self::Vision => "vision",
            Self::Reasoning => "reasoning",
            Self::Embeddings => "embeddings",
            Self::LongContext => "long_context",
            Self::Streaming => "streaming",
        }
    }
}

/// Fully-qualified model identifier in `provider/model` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(provider: &str, model: &str) -> Self {
        Self(format!("{provider}/{model}"))
    }

    /// The provider segment before the first `/`.
    pub fn provider(&self) -> &str {
        self.0.split_once('/').map_or("", |(p, _)| p)
    }

    /// The model segment after the first `/`.
    pub fn model(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(_, m)| m)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModelId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.split_once('/').is_none_or(|(p, m)| p.is_empty() || m.is_empty()) {
            return Err(CoreError::Validation(format!(
                "model id must be provider/model, got '{s}'"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

/// Immutable description of one model, keyed by [`ModelId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Fully-qualified `provider/model` id.
    pub id: ModelId,
    /// Human-readable display name.
    pub name: String,
    pub description: String,
    /// Advertised capability set.
    pub capabilities: BTreeSet<Capability>,
    /// Maximum input context window in tokens.
    pub context_window: u64,
    /// Maximum output tokens per response.
    pub max_output_tokens: u64,
    /// USD per million input tokens.
    pub input_cost_per_mtok: f64,
    /// USD per million output tokens.
    pub output_cost_per_mtok: f64,
    /// Nominal latency when no observations exist yet.
    pub avg_latency_ms: Option<f64>,
    /// Quality rating in [0, 1].
    pub quality_score: Option<f64>,
    /// Knowledge cutoff, e.g. "2024-06".
    pub knowledge_cutoff: Option<String>,
    /// Marked as a reasoning-tuned model.
    #[serde(default)]
    pub is_reasoning: bool,
    /// Accepts non-text input.
    #[serde(default)]
    pub is_multimodal: bool,
}

impl ModelSpec {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn has_all(&self, required: &BTreeSet<Capability>) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }

    /// Whether this entry may omit `text_generation` (single-purpose models).
    pub fn is_special_purpose(&self) -> bool {
        self.capabilities.contains(&Capability::Embeddings)
            && !self.capabilities.contains(&Capability::TextGeneration)
    }

    /// Dollar cost of a request at this model's unit prices.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_mtok
            + (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_mtok
    }
}
