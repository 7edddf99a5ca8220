//! Built-in model catalog.
//!
//! Unit costs are USD per million tokens. Quality ratings and nominal
//! latencies seed the router before observed latency accumulates.

use std::collections::BTreeSet;

use crate::domain::models::model_spec::{Capability, ModelId, ModelSpec};

fn caps(list: &[Capability]) -> BTreeSet<Capability> {
    list.iter().copied().collect()
}

/// Models served by the OpenAI adapter.
pub fn openai_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            id: ModelId::new("openai", "gpt-4.1"),
            name: "GPT-4.1".into(),
            description: "Most capable model for complex reasoning".into(),
            capabilities: caps(&[
                Capability::TextGeneration,
                Capability::FunctionCalling,
                Capability::StructuredOutput,
                Capability::Reasoning,
                Capability::LongContext,
                Capability::Streaming,
            ]),
            context_window: 1_000_000,
            max_output_tokens: 32_768,
            input_cost_per_mtok: 5.00,
            output_cost_per_mtok: 15.00,
            avg_latency_ms: Some(1200.0),
            quality_score: Some(0.95),
            knowledge_cutoff: Some("2024-06".into()),
            is_reasoning: true,
            is_multimodal: false,
        },
        ModelSpec {
            id: ModelId::new("openai", "gpt-4.1-mini"),
            name: "GPT-4.1 Mini".into(),
            description: "Fast and cost-effective model".into(),
            capabilities: caps(&[
                Capability::TextGeneration,
                Capability::FunctionCalling,
                Capability::StructuredOutput,
                Capability::LongContext,
                Capability::Streaming,
            ]),
            context_window: 1_000_000,
            max_output_tokens: 32_768,
            input_cost_per_mtok: 0.15,
            output_cost_per_mtok: 0.60,
            avg_latency_ms: Some(800.0),
            quality_score: Some(0.85),
            knowledge_cutoff: Some("2024-06".into()),
            is_reasoning: false,
            is_multimodal: false,
        },
    ]
}

/// Models served by the Anthropic adapter.
pub fn anthropic_models() -> Vec<ModelSpec> {
    vec![ModelSpec {
        id: ModelId::new("anthropic", "claude-3.5-sonnet"),
        name: "Claude 3.5 Sonnet".into(),
        description: "High-performance model balancing speed and intelligence".into(),
        capabilities: caps(&[
            Capability::TextGeneration,
            Capability::FunctionCalling,
            Capability::Vision,
            Capability::LongContext,
            Capability::Streaming,
        ]),
        context_window: 200_000,
        max_output_tokens: 8_192,
        input_cost_per_mtok: 3.00,
        output_cost_per_mtok: 15.00,
        avg_latency_ms: Some(1500.0),
        quality_score: Some(0.92),
        knowledge_cutoff: Some("2024-04".into()),
        is_reasoning: false,
        is_multimodal: true,
    }]
}

/// Models served by the Groq adapter.
pub fn groq_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            id: ModelId::new("groq", "llama-3.3-70b-versatile"),
            name: "Llama 3.3 70B Versatile".into(),
            description: "High-speed inference optimized model".into(),
            capabilities: caps(&[
                Capability::TextGeneration,
                Capability::FunctionCalling,
                Capability::StructuredOutput,
                Capability::Streaming,
            ]),
            context_window: 8_192,
            max_output_tokens: 8_192,
            input_cost_per_mtok: 0.59,
            output_cost_per_mtok: 0.79,
            avg_latency_ms: Some(50.0),
            quality_score: Some(0.82),
            knowledge_cutoff: Some("2023-12".into()),
            is_reasoning: false,
            is_multimodal: false,
        },
        ModelSpec {
            id: ModelId::new("groq", "llama-3.3-70b-specdec"),
            name: "Llama 3.3 70B SpecDec".into(),
            description: "Extreme speed with speculative decoding".into(),
            capabilities: caps(&[
                Capability::TextGeneration,
                Capability::FunctionCalling,
                Capability::StructuredOutput,
                Capability::Streaming,
            ]),
            context_window: 8_192,
            max_output_tokens: 8_192,
            input_cost_per_mtok: 0.59,
            output_cost_per_mtok: 0.79,
            avg_latency_ms: Some(25.0),
            quality_score: Some(0.80),
            knowledge_cutoff: Some("2023-12".into()),
            is_reasoning: false,
            is_multimodal: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_model_generates_text() {
        for spec in openai_models()
            .into_iter()
            .chain(anthropic_models())
            .chain(groq_models())
        {
            assert!(
                spec.has_capability(Capability::TextGeneration),
                "{} lacks text_generation",
                spec.id
            );
        }
    }

    #[test]
    fn catalog_ids_match_provider() {
        for spec in openai_models() {
            assert_eq!(spec.id.provider(), "openai");
        }
        for spec in groq_models() {
            assert_eq!(spec.id.provider(), "groq");
        }
    }
}
