// tests/rebind_test.rs
// Hot-swapping pool bindings:
// 1. Requests in flight finish on the backend they captured
// 2. Requests started after a successful rebind use the new backend
// 3. Rebinding to the same model is a no-op; failures leave the pool untouched

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;

use prism_engine::config::PrismConfig;
use prism_engine::core::error::EngineError;
use prism_engine::llm::{InferenceService, LlmBackend, ModelHint};

const PROXY_MODEL: &str = "llama-4-scout-17b-16e-instruct";
const BASE_MODEL: &str = "gemini-2.0-flash";

fn service_config() -> PrismConfig {
    PrismConfig {
        proxy_provider: "cerebras".into(),
        proxy_api_key: "test-key".into(),
        proxy_model: PROXY_MODEL.into(),
        proxy_max_output_tokens: 5000,
        proxy_context_limit: None,
        base_provider: "gemini".into(),
        base_api_key: "test-key".into(),
        base_model: BASE_MODEL.into(),
        base_max_output_tokens: 150_000,
        base_context_limit: None,
        moa_enabled: true,
        moa_iterations: 2,
        moa_agents: vec!["proxy".into(), "base".into()],
        moa_max_parallel: 2,
        moa_agent_timeout_secs: 60,
        default_deadline_secs: 120,
        reserved_output_tokens: 512,
        chunk_max_size: 1000,
        chunk_overlap: 0,
        chunk_strategy: "token".into(),
        chunk_mode: "parallel".into(),
        conservative_token_ratio: 3,
        log_level: "info".into(),
    }
}

// ============================================================================
// Delegator-level swap semantics (scripted backends)
// ============================================================================

#[tokio::test]
async fn in_flight_request_finishes_on_captured_backend() {
    let old_proxy = Arc::new(
        ScriptedBackend::new("old-model", 8192)
            .with_reply("from old")
            .with_delays(vec![Duration::from_millis(60)]),
    );
    let base = Arc::new(ScriptedBackend::new(BASE_MODEL, 32_768));
    let (delegator, proxy_pool, _) = delegator_over(old_proxy.clone(), base.clone());
    let delegator = Arc::new(delegator);

    // Launch a slow request, then swap the pool underneath it
    let running = {
        let delegator = delegator.clone();
        tokio::spawn(async move {
            delegator
                .simple("slow request", &ModelHint::Auto, far_deadline())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;

    let new_proxy = Arc::new(ScriptedBackend::new("new-model", 8192).with_reply("from new"));
    let returned = proxy_pool
        .swap(new_proxy.clone() as Arc<dyn LlmBackend>)
        .await;
    assert_eq!(returned.model_id(), "old-model");

    // The in-flight request completes against the old binding
    let response = running.await.unwrap().unwrap();
    assert_eq!(response.text, "from old");
    assert_eq!(response.route.models(), &["old-model".to_string()]);

    // A fresh request routes to the new binding
    let response = delegator
        .simple("next request", &ModelHint::Auto, far_deadline())
        .await
        .unwrap();
    assert_eq!(response.text, "from new");
    assert_eq!(new_proxy.call_count(), 1);
    assert_eq!(old_proxy.call_count(), 1);
}

#[tokio::test]
async fn no_request_after_swap_uses_the_old_backend() {
    let old_proxy = Arc::new(ScriptedBackend::new("old-model", 8192));
    let base = Arc::new(ScriptedBackend::new(BASE_MODEL, 32_768));
    let (delegator, proxy_pool, _) = delegator_over(old_proxy.clone(), base);

    proxy_pool
        .swap(Arc::new(ScriptedBackend::new("new-model", 8192)) as Arc<dyn LlmBackend>)
        .await;

    for _ in 0..5 {
        let response = delegator
            .simple("hello", &ModelHint::Auto, far_deadline())
            .await
            .unwrap();
        assert_eq!(response.route.models(), &["new-model".to_string()]);
    }
    assert_eq!(old_proxy.call_count(), 0);
}

// ============================================================================
// Service-level rebind
// ============================================================================

#[tokio::test]
async fn rebind_switches_the_reported_model() {
    let service = InferenceService::new(service_config());
    service.start().await.unwrap();

    assert_eq!(service.proxy_model().await.unwrap(), PROXY_MODEL);
    service.set_proxy_model("llama3.1-8b").await.unwrap();
    assert_eq!(service.proxy_model().await.unwrap(), "llama3.1-8b");

    service.set_base_model("gemini-2.0-flash-lite").await.unwrap();
    assert_eq!(
        service.base_model().await.unwrap(),
        "gemini-2.0-flash-lite"
    );
}

#[tokio::test]
async fn rebinding_to_the_current_model_is_a_no_op() {
    let service = InferenceService::new(service_config());
    service.start().await.unwrap();

    service.set_proxy_model("llama3.1-8b").await.unwrap();
    // Second identical call succeeds and changes nothing
    service.set_proxy_model("llama3.1-8b").await.unwrap();
    assert_eq!(service.proxy_model().await.unwrap(), "llama3.1-8b");
}

#[tokio::test]
async fn failed_rebind_leaves_the_pool_unchanged() {
    let service = InferenceService::new(service_config());
    service.start().await.unwrap();

    // A model the catalog attributes to the other provider
    let err = service.set_proxy_model("gemini-2.0-flash").await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(service.proxy_model().await.unwrap(), PROXY_MODEL);
}

#[tokio::test]
async fn rebind_requires_a_running_service() {
    let service = InferenceService::new(service_config());
    let err = service.set_proxy_model("llama3.1-8b").await.unwrap_err();
    assert!(matches!(err, EngineError::NotRunning));
}

#[tokio::test]
async fn listings_cover_defaults_and_rebind_targets() {
    let service = InferenceService::new(service_config());
    let primary = service.list_primary_models();
    assert!(primary.contains(&PROXY_MODEL));
    assert!(primary.contains(&"llama3.1-8b"));

    let fallback = service.list_fallback_models();
    assert!(fallback.contains(&BASE_MODEL));
    assert!(fallback.contains(&"gemini-2.0-flash-lite"));
}
