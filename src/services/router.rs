//! Policy-driven model routing.
//!
//! Selection runs three passes: a capability filter derived from the
//! request plus the policy, a constraint filter with a soft fallback to
//! the full candidate set, and a weighted score over cost, latency, and
//! quality. Observed latency (last 100 calls per model) takes precedence
//! over the catalog's nominal figure.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::llm::{LlmRequest, LlmResponse, ResponseFormat};
use crate::domain::models::model_spec::{Capability, ModelId, ModelSpec};
use crate::domain::models::routing::RoutingPolicy;

use super::cache::ResponseCache;
use super::rate_limit::RateLimiter;
use super::registry::ModelRegistry;

/// Ring-buffer depth for observed latencies.
const LATENCY_WINDOW: usize = 100;
/// Estimated input size above which long-context support is required.
const LONG_CONTEXT_THRESHOLD_TOKENS: u64 = 16_000;
/// Score bonus for the policy's preferred provider.
const PROVIDER_BONUS: f64 = 0.1;

/// Defaults applied when the request leaves generation knobs unset;
/// these also pin the cache key.
const CACHE_DEFAULT_TEMPERATURE: f64 = 0.7;
const CACHE_DEFAULT_MAX_TOKENS: u64 = 1000;

/// Routes uniform LLM requests to concrete models and executes them.
pub struct ModelRouter {
    registry: Arc<ModelRegistry>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    latency_history: Mutex<HashMap<ModelId, VecDeque<f64>>>,
}

impl ModelRouter {
    pub fn new(
        registry: Arc<ModelRegistry>,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registry,
            cache,
            limiter,
            latency_history: Mutex::new(HashMap::new()),
        }
    }

    /// Select a model for the request without executing it.
    pub async fn select_model(
        &self,
        request: &LlmRequest,
        policy: &RoutingPolicy,
    ) -> CoreResult<ModelId> {
        let all: Vec<&ModelSpec> = self.registry.all().collect();
        if all.is_empty() {
            return Err(CoreError::NoCandidate);
        }

        let required = self.required_capabilities(request, policy);
        let mut candidates: Vec<&ModelSpec> =
            all.iter().copied().filter(|s| s.has_all(&required)).collect();
        if candidates.is_empty() {
            warn!(?required, "no models match required capabilities, using full set");
            candidates = all.clone();
        }

        let latencies = self.latency_snapshot(&candidates).await;
        let constrained = self.apply_constraints(&candidates, request, policy, &latencies);
        let pool = if constrained.is_empty() {
            // Soft policy: constraints filtered everything out, fall
            // back rather than fail the request.
            warn!("no models meet policy constraints, falling back to unconstrained candidates");
            candidates
        } else {
            constrained
        };

        let selected = self.score_and_pick(&pool, policy, &latencies)?;
        debug!(model = %selected, candidates = pool.len(), "selected model");
        Ok(selected)
    }

    /// Route and execute: select a model when the request names none,
    /// consult the cache when `use_cache` is set, account the call with
    /// the rate limiter, and record observed latency on success.
    pub async fn route(
        &self,
        mut request: LlmRequest,
        policy: &RoutingPolicy,
        use_cache: bool,
    ) -> CoreResult<LlmResponse> {
        let model_id = match &request.model {
            Some(id) => {
                if self.registry.get(id).is_none() {
                    return Err(CoreError::Validation(format!("unknown model: {id}")));
                }
                id.clone()
            }
            None => {
                let id = self.select_model(&request, policy).await?;
                request.model = Some(id.clone());
                id
            }
        };

        let temperature = request.temperature.unwrap_or(CACHE_DEFAULT_TEMPERATURE);
        let max_tokens = request.max_tokens.unwrap_or(CACHE_DEFAULT_MAX_TOKENS);

        if use_cache {
            if let Some(mut cached) = self
                .cache
                .get(&request.prompt, model_id.as_str(), temperature, max_tokens)
                .await
            {
                cached.cost_usd = 0.0;
                cached
                    .metadata
                    .insert("cache_hit".to_string(), serde_json::Value::Bool(true));
                return Ok(cached);
            }
        }

        let spec = self
            .registry
            .get(&model_id)
            .ok_or(CoreError::NoCandidate)?
            .clone();
        let estimated_cost = (request.estimated_input_tokens() as f64 / 1_000_000.0)
            * spec.input_cost_per_mtok;
        let (allowed, info) = self
            .limiter
            .check(model_id.provider(), model_id.model(), estimated_cost)
            .await;
        if !allowed {
            return Err(CoreError::RateLimited(format!(
                "{model_id}: {}/{} req/min, {}/{} req/hr, ${:.4}/${:.2} hr",
                info.minute_count,
                info.requests_per_minute,
                info.hour_count,
                info.requests_per_hour,
                info.hour_cost_usd,
                info.cost_limit_per_hour_usd,
            )));
        }

        let adapter = self
            .registry
            .adapter_for(&model_id)
            .ok_or(CoreError::NoCandidate)?;
        let response = adapter.generate(&request).await?;

        self.record_latency(&model_id, response.latency_ms).await;
        self.limiter
            .record_usage(
                model_id.provider(),
                model_id.model(),
                response.cost_usd,
                response.tokens_used,
            )
            .await;
        if use_cache {
            self.cache
                .set(
                    &request.prompt,
                    model_id.as_str(),
                    temperature,
                    max_tokens,
                    &response,
                )
                .await?;
        }

        info!(
            model = %response.model,
            tokens = response.tokens_used,
            cost = response.cost_usd,
            latency_ms = response.latency_ms,
            "generated LLM response"
        );
        Ok(response)
    }

    fn required_capabilities(
        &self,
        request: &LlmRequest,
        policy: &RoutingPolicy,
    ) -> BTreeSet<Capability> {
        let mut required = policy.required_capabilities.clone();
        if !request.tools.is_empty() {
            required.insert(Capability::FunctionCalling);
        }
        if request.response_format == ResponseFormat::Json {
            required.insert(Capability::StructuredOutput);
        }
        if request.estimated_input_tokens() > LONG_CONTEXT_THRESHOLD_TOKENS {
            required.insert(Capability::LongContext);
        }
        required
    }

    fn apply_constraints<'a>(
        &self,
        candidates: &[&'a ModelSpec],
        request: &LlmRequest,
        policy: &RoutingPolicy,
        latencies: &HashMap<ModelId, f64>,
    ) -> Vec<&'a ModelSpec> {
        candidates
            .iter()
            .copied()
            .filter(|spec| {
                if let Some(max_cost) = policy.max_cost_per_request {
                    let estimate = (request.estimated_input_tokens() as f64 / 1_000_000.0)
                        * spec.input_cost_per_mtok;
                    if estimate > max_cost {
                        return false;
                    }
                }
                if let Some(max_latency) = policy.max_latency_ms {
                    if let Some(latency) = latencies.get(&spec.id) {
                        if *latency > max_latency {
                            return false;
                        }
                    }
                }
                true
            })
            .collect()
    }

    fn score_and_pick(
        &self,
        pool: &[&ModelSpec],
        policy: &RoutingPolicy,
        latencies: &HashMap<ModelId, f64>,
    ) -> CoreResult<ModelId> {
        if pool.is_empty() {
            return Err(CoreError::NoCandidate);
        }

        let costs: Vec<f64> = pool.iter().map(|s| s.input_cost_per_mtok).collect();
        let (min_cost, max_cost) = min_max(&costs);
        let known_latencies: Vec<f64> = pool
            .iter()
            .filter_map(|s| latencies.get(&s.id).copied())
            .collect();
        let latency_bounds = if known_latencies.is_empty() {
            None
        } else {
            Some(min_max(&known_latencies))
        };

        // Lexicographic id order makes the arg-max tiebreak deterministic:
        // the first of equal scores wins.
        let mut sorted: Vec<&ModelSpec> = pool.to_vec();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut best: Option<(&ModelSpec, f64)> = None;
        for spec in sorted {
            let cost_score = invert_normalize(spec.input_cost_per_mtok, min_cost, max_cost);
            let latency_score = match (latencies.get(&spec.id), latency_bounds) {
                (Some(latency), Some((min, max))) => invert_normalize(*latency, min, max),
                _ => 0.5,
            };
            let quality_score = spec.quality_score.unwrap_or(0.5);
            let provider_bonus = if policy.prefer_provider.as_deref() == Some(spec.id.provider()) {
                PROVIDER_BONUS
            } else {
                0.0
            };
            let total = cost_score * policy.cost_weight
                + latency_score * policy.latency_weight
                + quality_score * policy.quality_weight
                + provider_bonus;

            if best.is_none_or(|(_, best_score)| total > best_score) {
                best = Some((spec, total));
            }
        }

        best.map(|(spec, _)| spec.id.clone())
            .ok_or(CoreError::NoCandidate)
    }

    /// Mean observed latency, falling back to the catalog's nominal value.
    async fn latency_snapshot(&self, candidates: &[&ModelSpec]) -> HashMap<ModelId, f64> {
        let history = self.latency_history.lock().await;
        candidates
            .iter()
            .filter_map(|spec| {
                let observed = history.get(&spec.id).and_then(|ring| {
                    if ring.is_empty() {
                        None
                    } else {
                        Some(ring.iter().sum::<f64>() / ring.len() as f64)
                    }
                });
                observed
                    .or(spec.avg_latency_ms)
                    .map(|latency| (spec.id.clone(), latency))
            })
            .collect()
    }

    async fn record_latency(&self, model_id: &ModelId, latency_ms: f64) {
        let mut history = self.latency_history.lock().await;
        let ring = history.entry(model_id.clone()).or_default();
        ring.push_back(latency_ms);
        while ring.len() > LATENCY_WINDOW {
            ring.pop_front();
        }
    }

    /// Observed latency samples for one model, oldest first.
    pub async fn observed_latencies(&self, model_id: &ModelId) -> Vec<f64> {
        self.latency_history
            .lock()
            .await
            .get(model_id)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(*v);
        max = max.max(*v);
    }
    (min, max)
}

/// Normalize into [0, 1] and invert so that smaller raw values score
/// higher. A degenerate range scores 1.0.
fn invert_normalize(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        return 1.0;
    }
    (1.0 - (value - min) / (max - min)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{mock_spec, MockProvider};
    use crate::services::cache::{CacheConfig, ResponseCache};
    use crate::services::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::services::registry::{ModelRegistry, RegistryConfig};

    fn router_with_specs(specs: Vec<ModelSpec>) -> ModelRouter {
        let provider = Arc::new(MockProvider::new("mock").with_models(specs));
        let registry = Arc::new(
            ModelRegistry::new(vec![provider], &RegistryConfig::unchecked()).unwrap(),
        );
        ModelRouter::new(
            registry,
            Arc::new(ResponseCache::in_process(CacheConfig::default())),
            Arc::new(RateLimiter::in_process(RateLimitConfig::default())),
        )
    }

    fn spec(model: &str, cost: f64, latency: f64, quality: f64) -> ModelSpec {
        let mut s = mock_spec("mock", model);
        s.input_cost_per_mtok = cost;
        s.avg_latency_ms = Some(latency);
        s.quality_score = Some(quality);
        s
    }

    #[tokio::test]
    async fn cost_weighted_policy_picks_cheap_model() {
        let router = router_with_specs(vec![
            spec("m1", 5.0, 1000.0, 0.9),
            spec("m2", 0.5, 3000.0, 0.8),
        ]);
        let policy = RoutingPolicy::weighted(0.8, 0.1, 0.1);
        let selected = router
            .select_model(&LlmRequest::new("hello"), &policy)
            .await
            .unwrap();
        assert_eq!(selected.model(), "m2");
    }

    #[tokio::test]
    async fn latency_weighted_policy_picks_fast_model() {
        let router = router_with_specs(vec![
            spec("m1", 5.0, 1000.0, 0.9),
            spec("m2", 0.5, 3000.0, 0.8),
        ]);
        let policy = RoutingPolicy::weighted(0.1, 0.8, 0.1);
        let selected = router
            .select_model(&LlmRequest::new("hello"), &policy)
            .await
            .unwrap();
        assert_eq!(selected.model(), "m1");
    }

    #[tokio::test]
    async fn json_format_requires_structured_output() {
        let mut plain = spec("plain", 1.0, 100.0, 0.9);
        plain.capabilities.remove(&Capability::StructuredOutput);
        let capable = spec("capable", 5.0, 100.0, 0.5);

        let router = router_with_specs(vec![plain, capable]);
        let request = LlmRequest::new("hello").with_response_format(ResponseFormat::Json);
        let selected = router
            .select_model(&request, &RoutingPolicy::default())
            .await
            .unwrap();
        assert_eq!(selected.model(), "capable");
    }

    #[tokio::test]
    async fn long_prompt_requires_long_context() {
        let mut small = spec("small", 0.1, 10.0, 0.9);
        small.capabilities.remove(&Capability::LongContext);
        let mut large = spec("large", 5.0, 2000.0, 0.6);
        large.capabilities.insert(Capability::LongContext);

        let router = router_with_specs(vec![small, large]);
        let request = LlmRequest::new("x".repeat(80_000));
        let selected = router
            .select_model(&request, &RoutingPolicy::default())
            .await
            .unwrap();
        assert_eq!(selected.model(), "large");
    }

    #[tokio::test]
    async fn provider_bonus_breaks_near_ties() {
        let provider_a = Arc::new(
            MockProvider::new("alpha").with_models(vec![{
                let mut s = mock_spec("alpha", "m");
                s.input_cost_per_mtok = 1.0;
                s.quality_score = Some(0.8);
                s
            }]),
        );
        let provider_b = Arc::new(
            MockProvider::new("beta").with_models(vec![{
                let mut s = mock_spec("beta", "m");
                s.input_cost_per_mtok = 1.0;
                s.quality_score = Some(0.8);
                s
            }]),
        );
        let registry = Arc::new(
            ModelRegistry::new(vec![provider_a, provider_b], &RegistryConfig::unchecked())
                .unwrap(),
        );
        let router = ModelRouter::new(
            registry,
            Arc::new(ResponseCache::in_process(CacheConfig::default())),
            Arc::new(RateLimiter::in_process(RateLimitConfig::default())),
        );

        let policy = RoutingPolicy::default().with_preferred_provider("beta");
        let selected = router
            .select_model(&LlmRequest::new("hello"), &policy)
            .await
            .unwrap();
        assert_eq!(selected.provider(), "beta");
    }

    #[tokio::test]
    async fn constraint_fallback_is_soft() {
        // Every model violates the cost cap; the router falls back to
        // the full candidate set instead of failing.
        let router = router_with_specs(vec![spec("m1", 100.0, 50.0, 0.9)]);
        let policy = RoutingPolicy::default().with_max_cost(0.000_000_001);
        let request = LlmRequest::new("x".repeat(4000));
        let selected = router.select_model(&request, &policy).await.unwrap();
        assert_eq!(selected.model(), "m1");
    }

    #[tokio::test]
    async fn route_records_latency() {
        let router = router_with_specs(vec![spec("m1", 1.0, 100.0, 0.9)]);
        let response = router
            .route(LlmRequest::new("hello"), &RoutingPolicy::default(), false)
            .await
            .unwrap();
        let samples = router.observed_latencies(&response.model).await;
        assert_eq!(samples.len(), 1);
    }

    #[tokio::test]
    async fn route_rejects_unknown_explicit_model() {
        let router = router_with_specs(vec![spec("m1", 1.0, 100.0, 0.9)]);
        let request = LlmRequest::new("hello").with_model(ModelId::new("mock", "ghost"));
        let err = router
            .route(request, &RoutingPolicy::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn tie_break_is_lexicographic() {
        let router = router_with_specs(vec![
            spec("zeta", 1.0, 100.0, 0.8),
            spec("alpha", 1.0, 100.0, 0.8),
        ]);
        let selected = router
            .select_model(&LlmRequest::new("hello"), &RoutingPolicy::default())
            .await
            .unwrap();
        assert_eq!(selected.model(), "alpha");
    }
}
