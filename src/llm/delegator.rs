// src/llm/delegator.rs
// Routing and fallback between the proxy and base pools, with optional MoA
// preference for the advanced strategies.
//
// One request gets at most two backend attempts: the initially-chosen pool
// and, when the failure class allows it, a single hop to the base pool.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::error::{EngineError, EngineResult};
use crate::llm::context::TextGenerator;
use crate::llm::moa::MoaPipeline;
use crate::llm::pool::Pool;
use crate::llm::prompts;
use crate::llm::provider::LlmBackend;
use crate::llm::types::{time_left, Message, ModelHint, Response, Route};

pub struct Delegator {
    proxy: Arc<Pool>,
    base: Arc<Pool>,
    /// Copy-on-write: rebinds install a new pipeline; in-flight requests keep
    /// the snapshot they captured.
    moa: RwLock<Option<Arc<MoaPipeline>>>,
    /// Output budget reserved when testing whether a prompt fits the proxy.
    reserved_output_tokens: usize,
}

impl Delegator {
    pub fn new(
        proxy: Arc<Pool>,
        base: Arc<Pool>,
        moa: Option<Arc<MoaPipeline>>,
        reserved_output_tokens: usize,
    ) -> Self {
        Self {
            proxy,
            base,
            moa: RwLock::new(moa),
            reserved_output_tokens,
        }
    }

    /// Replace the MoA pipeline (or remove it). Requests already running
    /// continue with the pipeline they snapshotted.
    pub async fn set_moa(&self, moa: Option<Arc<MoaPipeline>>) {
        let mut slot = self.moa.write().await;
        *slot = moa;
    }

    pub async fn has_moa(&self) -> bool {
        self.moa.read().await.is_some()
    }

    async fn moa_snapshot(&self) -> Option<Arc<MoaPipeline>> {
        self.moa.read().await.clone()
    }

    // ========================================================================
    // Public strategies
    // ========================================================================

    /// Plain generation: route by estimate, fall back once if the failure
    /// class allows. MoA is not consulted unless the hint demands it.
    pub async fn simple(
        &self,
        prompt: &str,
        hint: &ModelHint,
        deadline: Instant,
    ) -> EngineResult<Response> {
        validate_prompt(prompt)?;
        if matches!(hint, ModelHint::Moa) {
            let (text, route) = self.moa_only(prompt, deadline).await?;
            return Ok(Response::ok(text, route));
        }
        let (text, route) = self.routed_generate(prompt, hint, deadline).await?;
        Ok(Response::ok(text, route))
    }

    /// Chain-of-thought: wrap the prompt in a step-by-step directive and
    /// prefer MoA when it is configured.
    pub async fn chain_of_thought(
        &self,
        prompt: &str,
        hint: &ModelHint,
        deadline: Instant,
    ) -> EngineResult<Response> {
        validate_prompt(prompt)?;
        let cot_prompt = prompts::chain_of_thought(prompt);
        let (text, route) = self.generate_preferring_moa(&cot_prompt, hint, deadline, "cot").await?;
        Ok(Response::ok(text, route))
    }

    /// Reflection: generate, then review-and-revise. Each step independently
    /// routes (and prefers MoA when configured).
    pub async fn reflection(
        &self,
        prompt: &str,
        hint: &ModelHint,
        deadline: Instant,
    ) -> EngineResult<Response> {
        validate_prompt(prompt)?;

        let (initial, mut route) = self
            .generate_preferring_moa(prompt, hint, deadline, "reflection-initial")
            .await?;

        let reflection_prompt = prompts::reflection(prompt, &initial);
        let (text, second_route) = self
            .generate_preferring_moa(&reflection_prompt, hint, deadline, "reflection-revise")
            .await?;

        route.extend(second_route);
        Ok(Response::ok(text, route))
    }

    /// Structured output: demand JSON matching `schema`. The schema is echoed
    /// in the response; the returned document is not validated here.
    pub async fn structured(
        &self,
        content: &str,
        schema: Value,
        hint: &ModelHint,
        deadline: Instant,
    ) -> EngineResult<Response> {
        validate_prompt(content)?;
        let schema_text = serde_json::to_string_pretty(&schema)
            .map_err(|e| EngineError::Config(format!("unserializable schema: {e}")))?;
        let prompt = prompts::structured(content, &schema_text);
        let (text, route) = self
            .generate_preferring_moa(&prompt, hint, deadline, "structured")
            .await?;
        Ok(Response::ok(text, route).with_schema(schema))
    }

    /// Direct MoA invocation, bypassing pool routing entirely.
    pub async fn moa_direct(&self, prompt: &str, deadline: Instant) -> EngineResult<Response> {
        validate_prompt(prompt)?;
        let (text, route) = self.moa_only(prompt, deadline).await?;
        Ok(Response::ok(text, route))
    }

    /// History-aware generation with the same estimate-and-fallback routing,
    /// estimating over the materialised conversation.
    pub async fn chat(
        &self,
        messages: &[Message],
        hint: &ModelHint,
        deadline: Instant,
    ) -> EngineResult<Response> {
        if messages.is_empty() || messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(EngineError::EmptyPrompt);
        }

        let proxy_backend = self.proxy.get().await;
        let base_backend = self.base.get().await;

        let materialized: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let (initial, is_proxy, pinned) =
            self.select_initial(&proxy_backend, &base_backend, &materialized, hint)?;

        time_left(deadline, "chat attempt")?;
        match initial.generate_from_history(messages, deadline).await {
            Ok(text) => Ok(Response::ok(text, Route::single(initial.model_id()))),
            Err(err) => {
                if !self.fallback_applies(&err, is_proxy, pinned, &proxy_backend, &base_backend) {
                    return Err(err);
                }
                time_left(deadline, "chat fallback")?;
                info!(
                    from = proxy_backend.model_id(),
                    to = base_backend.model_id(),
                    "Delegator: chat falling back to base"
                );
                match base_backend.generate_from_history(messages, deadline).await {
                    Ok(text) => {
                        let mut route = Route::single(proxy_backend.model_id());
                        route.push(base_backend.model_id());
                        Ok(Response::ok(text, route))
                    }
                    Err(second) => Err(composite(&err, &second, &proxy_backend, &base_backend)),
                }
            }
        }
    }

    // ========================================================================
    // Routing internals
    // ========================================================================

    async fn moa_only(&self, prompt: &str, deadline: Instant) -> EngineResult<(String, Route)> {
        let moa = self.moa_snapshot().await.ok_or(EngineError::MoaUnconfigured)?;
        let text = moa.generate(prompt, deadline).await?;
        Ok((text, Route::single(moa.route_label())))
    }

    /// MoA when configured and the hint leaves the choice open; the standard
    /// route otherwise, and as the fall-through when MoA fails for any reason
    /// short of a dead deadline.
    async fn generate_preferring_moa(
        &self,
        prompt: &str,
        hint: &ModelHint,
        deadline: Instant,
        operation: &str,
    ) -> EngineResult<(String, Route)> {
        match hint {
            ModelHint::Moa => return self.moa_only(prompt, deadline).await,
            ModelHint::Auto => {
                if let Some(moa) = self.moa_snapshot().await {
                    debug!(operation, "Delegator: using MoA");
                    match moa.generate(prompt, deadline).await {
                        Ok(text) => return Ok((text, Route::single(moa.route_label()))),
                        Err(err) if err.is_cancelled() => return Err(err),
                        Err(err) => {
                            warn!(operation, error = %err, "Delegator: MoA failed, using standard route");
                        }
                    }
                }
            }
            // An explicit pool/model hint overrides the MoA preference.
            _ => {}
        }
        self.routed_generate(prompt, hint, deadline).await
    }

    /// The single-generation routing algorithm: choose a pool by estimated
    /// cost, attempt it, and make at most one fallback hop to the base pool.
    async fn routed_generate(
        &self,
        prompt: &str,
        hint: &ModelHint,
        deadline: Instant,
    ) -> EngineResult<(String, Route)> {
        // Capture both bindings up front; never re-read the pools mid-request.
        let proxy_backend = self.proxy.get().await;
        let base_backend = self.base.get().await;

        let (initial, is_proxy, pinned) =
            self.select_initial(&proxy_backend, &base_backend, prompt, hint)?;

        time_left(deadline, "initial attempt")?;
        match initial.generate(prompt, deadline).await {
            Ok(text) => {
                debug!(model = initial.model_id(), "Delegator: generation succeeded");
                Ok((text, Route::single(initial.model_id())))
            }
            Err(err) => {
                if !self.fallback_applies(&err, is_proxy, pinned, &proxy_backend, &base_backend) {
                    debug!(
                        model = initial.model_id(),
                        kind = %err.kind(),
                        "Delegator: failure does not qualify for fallback"
                    );
                    return Err(err);
                }

                // A deadline that died between the attempts skips the hop.
                time_left(deadline, "fallback attempt")?;

                info!(
                    from = proxy_backend.model_id(),
                    to = base_backend.model_id(),
                    kind = %err.kind(),
                    "Delegator: falling back to base pool"
                );

                match base_backend.generate(prompt, deadline).await {
                    Ok(text) => {
                        let mut route = Route::single(proxy_backend.model_id());
                        route.push(base_backend.model_id());
                        Ok((text, route))
                    }
                    Err(second) => {
                        warn!(
                            model = base_backend.model_id(),
                            error = %second,
                            "Delegator: fallback also failed"
                        );
                        Err(composite(&err, &second, &proxy_backend, &base_backend))
                    }
                }
            }
        }
    }

    /// Pick the first backend to try. Returns (backend, is_proxy, pinned);
    /// a pinned choice never falls back.
    fn select_initial(
        &self,
        proxy_backend: &Arc<dyn LlmBackend>,
        base_backend: &Arc<dyn LlmBackend>,
        text: &str,
        hint: &ModelHint,
    ) -> EngineResult<(Arc<dyn LlmBackend>, bool, bool)> {
        match hint {
            ModelHint::Auto => {
                let estimate = proxy_backend.count_tokens(text);
                let budget = proxy_backend
                    .context_limit()
                    .saturating_sub(self.reserved_output_tokens);
                if estimate <= budget {
                    debug!(estimate, budget, "Delegator: routing to proxy");
                    Ok((proxy_backend.clone(), true, false))
                } else {
                    debug!(estimate, budget, "Delegator: estimate over proxy budget, routing to base");
                    Ok((base_backend.clone(), false, false))
                }
            }
            ModelHint::ProxyDefault => Ok((proxy_backend.clone(), true, false)),
            ModelHint::BaseDefault => Ok((base_backend.clone(), false, false)),
            ModelHint::Specific(name) => {
                if proxy_backend.model_id() == name {
                    Ok((proxy_backend.clone(), true, true))
                } else if base_backend.model_id() == name {
                    Ok((base_backend.clone(), false, true))
                } else {
                    Err(EngineError::UnknownModel(name.clone()))
                }
            }
            ModelHint::Moa => Err(EngineError::MoaUnconfigured),
        }
    }

    /// Fallback applies only from the proxy pool, for failure classes a
    /// different window or a retry can fix, and only when the pools are
    /// actually bound to different models.
    fn fallback_applies(
        &self,
        err: &EngineError,
        is_proxy: bool,
        pinned: bool,
        proxy_backend: &Arc<dyn LlmBackend>,
        base_backend: &Arc<dyn LlmBackend>,
    ) -> bool {
        is_proxy
            && !pinned
            && err.kind().allows_fallback()
            && proxy_backend.model_id() != base_backend.model_id()
    }
}

/// The delegator itself is a text generator: chunked processing re-enters
/// the routing logic once per chunk.
#[async_trait]
impl TextGenerator for Delegator {
    async fn generate_text(&self, prompt: &str, deadline: Instant) -> EngineResult<(String, Route)> {
        self.routed_generate(prompt, &ModelHint::Auto, deadline).await
    }
}

fn validate_prompt(prompt: &str) -> EngineResult<()> {
    if prompt.trim().is_empty() {
        return Err(EngineError::EmptyPrompt);
    }
    Ok(())
}

fn composite(
    first: &EngineError,
    second: &EngineError,
    proxy_backend: &Arc<dyn LlmBackend>,
    base_backend: &Arc<dyn LlmBackend>,
) -> EngineError {
    EngineError::BothAttemptsFailed {
        kind: first.kind().worse(second.kind()),
        initial_model: proxy_backend.model_id().to_string(),
        initial_message: first.to_string(),
        fallback_model: base_backend.model_id().to_string(),
        fallback_message: second.to_string(),
    }
}
