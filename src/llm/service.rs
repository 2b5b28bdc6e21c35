// src/llm/service.rs
// Public facade: lifecycle, generation entry points, rebind, model listings.
//
// Mirrors the capture-under-lock discipline used throughout the engine: every
// operation snapshots the running state once, then works entirely against the
// snapshot so rebinds never disturb requests already in flight.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::PrismConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::llm::catalog;
use crate::llm::chunker::{ChunkStrategy, Chunker};
use crate::llm::context::{ContextManager, ProcessingMode};
use crate::llm::delegator::Delegator;
use crate::llm::moa::{AgentSpec, MoaConfig, MoaPipeline};
use crate::llm::pool::{Pool, PoolRole};
use crate::llm::provider::{build_backend, BackendConfig};
use crate::llm::tokens::TokenEstimator;
use crate::llm::types::{GenerateRequest, Message, ModelHint, Response, Strategy};

struct EngineState {
    proxy: Arc<Pool>,
    base: Arc<Pool>,
    delegator: Arc<Delegator>,
    /// Construction configs for the current bindings; rebinds derive the
    /// replacement backend and the refreshed MoA roster from these.
    proxy_cfg: RwLock<BackendConfig>,
    base_cfg: RwLock<BackendConfig>,
}

/// The orchestration service callers talk to.
pub struct InferenceService {
    config: PrismConfig,
    state: RwLock<Option<Arc<EngineState>>>,
}

impl InferenceService {
    pub fn new(config: PrismConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &PrismConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Construct both pools (and the MoA pipeline when enabled) from
    /// configuration. Calling start on a running service rebuilds it.
    pub async fn start(&self) -> EngineResult<()> {
        info!("InferenceService: starting");
        self.config.validate()?;

        let proxy_cfg = BackendConfig::new(
            &self.config.proxy_provider,
            &self.config.proxy_api_key,
            &self.config.proxy_model,
        )
        .with_max_output_tokens(self.config.proxy_max_output_tokens)
        .with_context_limit(self.config.proxy_context_limit)
        .with_token_ratio(self.config.conservative_token_ratio);

        let base_cfg = BackendConfig::new(
            &self.config.base_provider,
            &self.config.base_api_key,
            &self.config.base_model,
        )
        .with_max_output_tokens(self.config.base_max_output_tokens)
        .with_context_limit(self.config.base_context_limit)
        .with_token_ratio(self.config.conservative_token_ratio);

        let proxy_backend = build_backend(&proxy_cfg)?;
        let base_backend = build_backend(&base_cfg)?;

        let proxy = Arc::new(Pool::new(PoolRole::Proxy, proxy_backend));
        let base = Arc::new(Pool::new(PoolRole::Base, base_backend));

        let moa = if self.config.moa_enabled {
            match build_moa(&self.config, &proxy_cfg, &base_cfg) {
                Ok(pipeline) => Some(Arc::new(pipeline)),
                Err(e) => {
                    warn!(error = %e, "InferenceService: MoA configuration failed, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let delegator = Arc::new(Delegator::new(
            proxy.clone(),
            base.clone(),
            moa,
            self.config.reserved_output_tokens,
        ));

        let state = Arc::new(EngineState {
            proxy,
            base,
            delegator,
            proxy_cfg: RwLock::new(proxy_cfg),
            base_cfg: RwLock::new(base_cfg),
        });

        *self.state.write().await = Some(state);
        info!(
            proxy_model = %self.config.proxy_model,
            base_model = %self.config.base_model,
            "InferenceService: started"
        );
        Ok(())
    }

    /// Release the pools and backends. In-flight requests finish against the
    /// snapshots they hold.
    pub async fn stop(&self) {
        let was_running = self.state.write().await.take().is_some();
        if was_running {
            info!("InferenceService: stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.is_some()
    }

    async fn state(&self) -> EngineResult<Arc<EngineState>> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(EngineError::NotRunning)
    }

    fn deadline_for(&self, req: &GenerateRequest) -> Instant {
        req.deadline
            .unwrap_or_else(|| Instant::now() + self.config.default_deadline())
    }

    // ========================================================================
    // Generation entry points
    // ========================================================================

    /// Dispatch on the request's strategy.
    pub async fn generate(&self, req: GenerateRequest) -> EngineResult<Response> {
        match req.strategy.clone() {
            Strategy::Simple => self.simple(req).await,
            Strategy::ChainOfThought => self.chain_of_thought(req).await,
            Strategy::Reflection => self.reflection(req).await,
            Strategy::Structured(schema) => self.structured(req, schema).await,
        }
    }

    pub async fn simple(&self, req: GenerateRequest) -> EngineResult<Response> {
        let st = self.state().await?;
        let deadline = self.deadline_for(&req);
        st.delegator.simple(&req.prompt, &req.model, deadline).await
    }

    pub async fn chain_of_thought(&self, req: GenerateRequest) -> EngineResult<Response> {
        let st = self.state().await?;
        let deadline = self.deadline_for(&req);
        st.delegator
            .chain_of_thought(&req.prompt, &req.model, deadline)
            .await
    }

    pub async fn reflection(&self, req: GenerateRequest) -> EngineResult<Response> {
        let st = self.state().await?;
        let deadline = self.deadline_for(&req);
        st.delegator
            .reflection(&req.prompt, &req.model, deadline)
            .await
    }

    pub async fn structured(&self, req: GenerateRequest, schema: Value) -> EngineResult<Response> {
        let st = self.state().await?;
        let deadline = self.deadline_for(&req);
        st.delegator
            .structured(&req.prompt, schema, &req.model, deadline)
            .await
    }

    /// Direct MoA invocation; errors when MoA is not configured.
    pub async fn moa_direct(&self, req: GenerateRequest) -> EngineResult<Response> {
        let st = self.state().await?;
        let deadline = self.deadline_for(&req);
        st.delegator.moa_direct(&req.prompt, deadline).await
    }

    /// History-aware generation with the standard routing.
    pub async fn chat(
        &self,
        messages: &[Message],
        deadline: Option<Instant>,
    ) -> EngineResult<Response> {
        let st = self.state().await?;
        let deadline =
            deadline.unwrap_or_else(|| Instant::now() + self.config.default_deadline());
        st.delegator.chat(messages, &ModelHint::Auto, deadline).await
    }

    /// Chunk an oversized input and process it through the delegator.
    /// Per-call overrides fall back to the configured chunk defaults.
    pub async fn process_large(
        &self,
        req: GenerateRequest,
        mode: Option<ProcessingMode>,
        strategy: Option<ChunkStrategy>,
        max_chunk_size: Option<usize>,
        overlap: Option<usize>,
    ) -> EngineResult<Response> {
        let st = self.state().await?;
        let deadline = self.deadline_for(&req);

        if req.prompt.trim().is_empty() {
            return Err(EngineError::EmptyPrompt);
        }

        let mode = match mode {
            Some(m) => m,
            None => self.config.chunk_mode.parse()?,
        };
        let strategy = match strategy {
            Some(s) => s,
            None => self.config.chunk_strategy.parse()?,
        };
        let chunker = Chunker::new(
            TokenEstimator::new(self.config.conservative_token_ratio),
            max_chunk_size.unwrap_or(self.config.chunk_max_size),
            overlap.unwrap_or(self.config.chunk_overlap),
        );
        let manager = ContextManager::new(chunker, strategy, mode);

        let instruction = req.instruction.clone().unwrap_or_default();
        manager
            .process(st.delegator.as_ref(), &req.prompt, &instruction, deadline)
            .await
    }

    // ========================================================================
    // Rebind and observability
    // ========================================================================

    /// Bind the proxy pool to a different model. Atomic for callers: requests
    /// started after this returns route to the new model, requests in flight
    /// finish on the backend they captured. The MoA pipeline is rebuilt
    /// because its default roster aliases the pools.
    pub async fn set_proxy_model(&self, model: &str) -> EngineResult<()> {
        let st = self.state().await?;

        if st.proxy.model_id().await == model {
            debug!(model, "InferenceService: proxy already bound to model, no-op");
            return Ok(());
        }

        let new_cfg = {
            let current = st.proxy_cfg.read().await;
            rebased_config(&current, model)?
        };

        // Construction failure leaves the pool untouched.
        let new_backend = build_backend(&new_cfg)?;
        let old = st.proxy.swap(new_backend).await;
        *st.proxy_cfg.write().await = new_cfg;

        self.refresh_moa(&st).await;

        info!(
            old_model = old.model_id(),
            new_model = model,
            "InferenceService: proxy model updated"
        );
        // `old` drops here; the Arc refcount keeps it alive for in-flight users.
        Ok(())
    }

    /// Bind the base pool to a different model. Same semantics as
    /// [`set_proxy_model`](Self::set_proxy_model).
    pub async fn set_base_model(&self, model: &str) -> EngineResult<()> {
        let st = self.state().await?;

        if st.base.model_id().await == model {
            debug!(model, "InferenceService: base already bound to model, no-op");
            return Ok(());
        }

        let new_cfg = {
            let current = st.base_cfg.read().await;
            rebased_config(&current, model)?
        };

        let new_backend = build_backend(&new_cfg)?;
        let old = st.base.swap(new_backend).await;
        *st.base_cfg.write().await = new_cfg;

        self.refresh_moa(&st).await;

        info!(
            old_model = old.model_id(),
            new_model = model,
            "InferenceService: base model updated"
        );
        Ok(())
    }

    /// Rebuild the MoA pipeline from the current pool configs. A roster that
    /// no longer resolves disables MoA rather than leaving a stale pipeline.
    async fn refresh_moa(&self, st: &EngineState) {
        if !self.config.moa_enabled {
            return;
        }
        let proxy_cfg = st.proxy_cfg.read().await.clone();
        let base_cfg = st.base_cfg.read().await.clone();
        match build_moa(&self.config, &proxy_cfg, &base_cfg) {
            Ok(pipeline) => st.delegator.set_moa(Some(Arc::new(pipeline))).await,
            Err(e) => {
                warn!(error = %e, "InferenceService: MoA rebuild failed, disabling MoA");
                st.delegator.set_moa(None).await;
            }
        }
    }

    pub async fn proxy_model(&self) -> EngineResult<String> {
        Ok(self.state().await?.proxy.model_id().await)
    }

    pub async fn base_model(&self) -> EngineResult<String> {
        Ok(self.state().await?.base.model_id().await)
    }

    /// Catalog models eligible for the proxy pool.
    pub fn list_primary_models(&self) -> Vec<&'static str> {
        catalog::models_for_provider(&self.config.proxy_provider)
    }

    /// Catalog models eligible for the base pool.
    pub fn list_fallback_models(&self) -> Vec<&'static str> {
        catalog::models_for_provider(&self.config.base_provider)
    }
}

/// Derive the rebind config for `model`, rejecting models the catalog
/// attributes to a different provider. Unknown models are allowed with the
/// default window, matching free-form model entry.
fn rebased_config(current: &BackendConfig, model: &str) -> EngineResult<BackendConfig> {
    if let Some(info) = catalog::lookup(model) {
        if info.provider != current.provider {
            return Err(EngineError::Config(format!(
                "model '{}' belongs to provider '{}', pool is '{}'",
                model, info.provider, current.provider
            )));
        }
    } else {
        warn!(model, "rebinding to a model the catalog does not know");
    }
    Ok(current.for_model(model))
}

/// Build the MoA pipeline from the configured roster. `proxy`/`base` tokens
/// alias the pool configs; model-id tokens resolve through the catalog to
/// whichever pool's provider matches.
fn build_moa(
    config: &PrismConfig,
    proxy_cfg: &BackendConfig,
    base_cfg: &BackendConfig,
) -> EngineResult<MoaPipeline> {
    let mut agents = Vec::with_capacity(config.moa_agents.len());
    for token in &config.moa_agents {
        let agent_cfg = match token.as_str() {
            "proxy" => proxy_cfg.clone(),
            "base" => base_cfg.clone(),
            model => {
                let info = catalog::lookup(model).ok_or_else(|| {
                    EngineError::Config(format!("unknown MoA agent '{model}'"))
                })?;
                if info.provider == proxy_cfg.provider {
                    proxy_cfg.for_model(model)
                } else if info.provider == base_cfg.provider {
                    base_cfg.for_model(model)
                } else {
                    return Err(EngineError::Config(format!(
                        "no credentials for MoA agent provider '{}'",
                        info.provider
                    )));
                }
            }
        };
        agents.push(AgentSpec::from_config(agent_cfg));
    }

    // The aggregator runs on the base pool's configuration: consolidation
    // wants the large window.
    let aggregator = build_backend(base_cfg)?;

    MoaPipeline::new(
        MoaConfig {
            iterations: config.moa_iterations,
            agents,
            max_parallel: config.moa_max_parallel,
            agent_timeout: config.moa_agent_timeout(),
        },
        aggregator,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PrismConfig {
        PrismConfig {
            proxy_provider: "cerebras".into(),
            proxy_api_key: "test-key".into(),
            proxy_model: "llama-4-scout-17b-16e-instruct".into(),
            proxy_max_output_tokens: 5000,
            proxy_context_limit: None,
            base_provider: "gemini".into(),
            base_api_key: "test-key".into(),
            base_model: "gemini-2.0-flash".into(),
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

    #[tokio::test]
    async fn test_operations_require_start() {
        let service = InferenceService::new(test_config());
        let err = service
            .simple(GenerateRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRunning));
        assert!(!service.is_running().await);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let service = InferenceService::new(test_config());
        service.start().await.unwrap();
        assert!(service.is_running().await);
        assert_eq!(
            service.proxy_model().await.unwrap(),
            "llama-4-scout-17b-16e-instruct"
        );
        assert_eq!(service.base_model().await.unwrap(), "gemini-2.0-flash");

        service.stop().await;
        assert!(!service.is_running().await);
        assert!(matches!(
            service.proxy_model().await,
            Err(EngineError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_start_requires_api_keys() {
        let mut config = test_config();
        config.proxy_api_key = String::new();
        let service = InferenceService::new(config);
        let err = service.start().await.unwrap_err();
        assert!(matches!(err, EngineError::ApiKeyMissing(_)));
        assert!(!service.is_running().await);
    }

    #[test]
    fn test_model_listings_follow_providers() {
        let service = InferenceService::new(test_config());
        let primary = service.list_primary_models();
        let fallback = service.list_fallback_models();
        assert!(primary.contains(&"llama-4-scout-17b-16e-instruct"));
        assert!(fallback.contains(&"gemini-2.0-flash"));
    }

    #[test]
    fn test_build_moa_resolves_roster() {
        let config = test_config();
        let proxy_cfg = BackendConfig::new("cerebras", "k", "llama-4-scout-17b-16e-instruct");
        let base_cfg = BackendConfig::new("gemini", "k", "gemini-2.0-flash");
        let pipeline = build_moa(&config, &proxy_cfg, &base_cfg).unwrap();
        assert_eq!(pipeline.agent_count(), 2);
        assert_eq!(pipeline.iterations(), 2);
    }

    #[test]
    fn test_build_moa_resolves_model_tokens_through_catalog() {
        let mut config = test_config();
        config.moa_agents = vec!["qwen-3-32b".into(), "gemini-2.0-flash-lite".into()];
        let proxy_cfg = BackendConfig::new("cerebras", "k", "llama-4-scout-17b-16e-instruct");
        let base_cfg = BackendConfig::new("gemini", "k", "gemini-2.0-flash");
        let pipeline = build_moa(&config, &proxy_cfg, &base_cfg).unwrap();
        assert_eq!(pipeline.agent_count(), 2);
        assert!(pipeline.route_label().contains("qwen-3-32b"));

        config.moa_agents = vec!["unknown-model".into()];
        assert!(build_moa(&config, &proxy_cfg, &base_cfg).is_err());
    }
}
