//! Routing policy for dynamic model selection.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::model_spec::Capability;

/// Weights and constraints that steer the router's scoring pass.
///
/// The three weights should sum to at most 1; the provider-preference
/// bonus is added on top of the weighted sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub cost_weight: f64,
    pub latency_weight: f64,
    pub quality_weight: f64,
    /// Provider whose models receive a 0.1 score bonus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_provider: Option<String>,
    /// Hard cap on the estimated USD cost of one request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_request: Option<f64>,
    /// Hard cap on recorded/nominal latency in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<f64>,
    /// Capabilities every candidate must advertise.
    #[serde(default)]
    pub required_capabilities: BTreeSet<Capability>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            cost_weight: 0.3,
            latency_weight: 0.4,
            quality_weight: 0.3,
            prefer_provider: None,
            max_cost_per_request: None,
            max_latency_ms: None,
            required_capabilities: BTreeSet::new(),
        }
    }
}

impl RoutingPolicy {
    /// A policy that leans heavily on one axis, keeping the others at 0.1.
    pub fn weighted(cost: f64, latency: f64, quality: f64) -> Self {
        Self {
            cost_weight: cost,
            latency_weight: latency,
            quality_weight: quality,
            ..Default::default()
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.prefer_provider = Some(provider.into());
        self
    }

    pub fn with_max_cost(mut self, usd: f64) -> Self {
        self.max_cost_per_request = Some(usd);
        self
    }

    pub fn with_max_latency_ms(mut self, ms: f64) -> Self {
        self.max_latency_ms = Some(ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let p = RoutingPolicy::default();
        assert!((p.cost_weight + p.latency_weight + p.quality_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn builder_chain() {
        let p = RoutingPolicy::weighted(0.8, 0.1, 0.1)
            .with_capability(Capability::TextGeneration)
            .with_preferred_provider("groq")
            .with_max_cost(0.05);
        assert_eq!(p.prefer_provider.as_deref(), Some("groq"));
        assert_eq!(p.max_cost_per_request, Some(0.05));
        assert!(p.required_capabilities.contains(&Capability::TextGeneration));
    }
}
