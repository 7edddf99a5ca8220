//! Cache and rate-limiter behavior through the routing path.

mod common;

use std::sync::Arc;

use hivemind::domain::models::llm::LlmRequest;
use hivemind::domain::models::routing::RoutingPolicy;
use hivemind::providers::MockProvider;
use hivemind::services::{CacheConfig, RateLimitConfig, RateLimiter, ResponseCache};

use common::Harness;

#[tokio::test]
async fn second_identical_request_hits_cache_at_zero_cost() {
    let harness = Harness::from_provider(Arc::new(
        MockProvider::new("mock").with_default_cost(0.05),
    ));
    let policy = RoutingPolicy::default();
    let request = || {
        LlmRequest::new("what is the answer?")
            .with_model("mock/mock-model".parse().unwrap())
            .with_temperature(0.0)
            .with_max_tokens(256)
    };

    let first = harness.router.route(request(), &policy, true).await.unwrap();
    assert!(first.cost_usd > 0.0);

    let second = harness.router.route(request(), &policy, true).await.unwrap();
    assert_eq!(second.content, first.content);
    assert_eq!(second.cost_usd, 0.0);
    assert_eq!(second.metadata.get("cache_hit"), Some(&serde_json::Value::Bool(true)));
    // The provider only saw one call.
    assert_eq!(harness.provider.call_count(), 1);

    let stats = harness.cache.stats().await;
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn different_temperature_is_a_cache_miss() {
    let harness = Harness::new();
    let policy = RoutingPolicy::default();
    let base = || {
        LlmRequest::new("same prompt").with_model("mock/mock-model".parse().unwrap())
    };

    harness
        .router
        .route(base().with_temperature(0.0), &policy, true)
        .await
        .unwrap();
    harness
        .router
        .route(base().with_temperature(0.9), &policy, true)
        .await
        .unwrap();
    assert_eq!(harness.provider.call_count(), 2);
}

#[tokio::test]
async fn cache_opt_out_always_calls_provider() {
    let harness = Harness::new();
    let policy = RoutingPolicy::default();
    let request = || LlmRequest::new("no caching here");

    harness.router.route(request(), &policy, false).await.unwrap();
    harness.router.route(request(), &policy, false).await.unwrap();
    assert_eq!(harness.provider.call_count(), 2);
}

#[tokio::test]
async fn cache_entry_expires_after_ttl() {
    use hivemind::domain::models::llm::{FinishReason, LlmResponse};
    use hivemind::domain::models::model_spec::ModelId;

    let cache = ResponseCache::in_process(CacheConfig { ttl_seconds: 1 });
    let response = LlmResponse {
        content: "short-lived".into(),
        model: ModelId::new("mock", "m"),
        tokens_used: 1,
        input_tokens: 1,
        output_tokens: 0,
        cost_usd: 0.0,
        latency_ms: 1.0,
        finish_reason: FinishReason::Stop,
        tool_calls: vec![],
        metadata: Default::default(),
    };
    cache.set("p", "m", 0.0, 64, &response).await.unwrap();
    assert!(cache.get("p", "m", 0.0, 64).await.is_some());

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    assert!(cache.get("p", "m", 0.0, 64).await.is_none());
}

#[tokio::test]
async fn admitted_count_is_bounded_by_caps() {
    // Caps: 5/min, 100/hr, $1/hr at $0.30 per request. The binding
    // constraint is cost: floor(1 / 0.3) = 3 admissions.
    let limiter = RateLimiter::in_process(RateLimitConfig {
        requests_per_minute: 5,
        requests_per_hour: 100,
        cost_limit_per_hour_usd: 1.0,
    });

    let mut admitted = 0;
    for _ in 0..20 {
        let (allowed, _) = limiter.check("mock", "m", 0.30).await;
        if allowed {
            admitted += 1;
        }
    }
    assert!(admitted <= 3, "admitted {admitted}");
    assert!(admitted >= 1);
}

#[tokio::test]
async fn request_caps_bind_when_cheapest() {
    let limiter = RateLimiter::in_process(RateLimitConfig {
        requests_per_minute: 4,
        requests_per_hour: 100,
        cost_limit_per_hour_usd: 1000.0,
    });

    let mut admitted = 0;
    for _ in 0..10 {
        let (allowed, _) = limiter.check("mock", "m", 0.0).await;
        if allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 4);
}
