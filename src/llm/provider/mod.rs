// src/llm/provider/mod.rs
// Backend trait - provider-agnostic single-model generation interface

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::core::error::{EngineError, EngineResult};
use crate::llm::catalog;
use crate::llm::types::Message;

pub mod cerebras;
pub mod gemini;

pub use cerebras::CerebrasBackend;
pub use gemini::GeminiBackend;

/// One adapter to one remote language-model API, bound to one model id.
///
/// Implementations are safe for concurrent `generate` calls and report their
/// failures already classified (see [`crate::core::error::ErrorKind`]).
/// `context_limit` is stable for the lifetime of the instance.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Provider name for logging ("cerebras", "gemini", ...).
    fn provider(&self) -> &'static str;

    /// The model this backend is bound to.
    fn model_id(&self) -> &str;

    /// Declared maximum input+output tokens for the bound model.
    fn context_limit(&self) -> usize;

    /// Estimated token count of `text` for this backend's model family.
    fn count_tokens(&self, text: &str) -> usize;

    /// Single-call text generation, bounded by `deadline`.
    async fn generate(&self, prompt: &str, deadline: Instant) -> EngineResult<String>;

    /// Generation from an ordered conversation history.
    async fn generate_from_history(
        &self,
        messages: &[Message],
        deadline: Instant,
    ) -> EngineResult<String>;
}

/// Everything needed to construct one backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub max_output_tokens: usize,
    /// Override for the catalog's declared window.
    pub context_limit: Option<usize>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    /// Characters per token for estimation.
    pub token_ratio: usize,
}

impl BackendConfig {
    pub fn new(provider: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_output_tokens: 1024,
            context_limit: None,
            temperature: None,
            top_p: None,
            top_k: None,
            token_ratio: 3,
        }
    }

    pub fn with_max_output_tokens(mut self, tokens: usize) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn with_context_limit(mut self, limit: Option<usize>) -> Self {
        self.context_limit = limit;
        self
    }

    pub fn with_token_ratio(mut self, ratio: usize) -> Self {
        self.token_ratio = ratio.max(1);
        self
    }

    /// Rebind helper: same configuration pointed at a different model.
    /// The context-limit override is dropped because it described the old model.
    pub fn for_model(&self, model: impl Into<String>) -> Self {
        let mut cfg = self.clone();
        cfg.model = model.into();
        cfg.context_limit = None;
        cfg
    }

    /// The window used for routing: explicit override, else catalog, else default.
    pub fn resolved_context_limit(&self) -> usize {
        self.context_limit
            .unwrap_or_else(|| catalog::context_limit_for(&self.model))
    }
}

/// Construct a backend from configuration.
///
/// This is the only place provider names are dispatched; everything above it
/// works in terms of `Arc<dyn LlmBackend>`.
pub fn build_backend(cfg: &BackendConfig) -> EngineResult<Arc<dyn LlmBackend>> {
    if cfg.api_key.is_empty() {
        return Err(EngineError::ApiKeyMissing(cfg.provider.clone()));
    }
    match cfg.provider.as_str() {
        "cerebras" => Ok(Arc::new(CerebrasBackend::new(cfg))),
        "gemini" => Ok(Arc::new(GeminiBackend::new(cfg))),
        other => Err(EngineError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_backend_dispatch() {
        let cfg = BackendConfig::new("cerebras", "key", "llama3.1-8b");
        let backend = build_backend(&cfg).unwrap();
        assert_eq!(backend.provider(), "cerebras");
        assert_eq!(backend.model_id(), "llama3.1-8b");

        let cfg = BackendConfig::new("gemini", "key", "gemini-2.0-flash");
        let backend = build_backend(&cfg).unwrap();
        assert_eq!(backend.provider(), "gemini");
    }

    #[test]
    fn test_build_backend_rejects_missing_key() {
        let cfg = BackendConfig::new("cerebras", "", "llama3.1-8b");
        let err = match build_backend(&cfg) {
            Err(e) => e,
            Ok(_) => panic!("expected build_backend to reject a missing key"),
        };
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Auth);
    }

    #[test]
    fn test_build_backend_rejects_unknown_provider() {
        let cfg = BackendConfig::new("acme", "key", "acme-1");
        assert!(matches!(
            build_backend(&cfg),
            Err(EngineError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_resolved_context_limit() {
        let cfg = BackendConfig::new("gemini", "key", "gemini-2.0-flash");
        assert_eq!(cfg.resolved_context_limit(), 1_048_576);

        let cfg = cfg.with_context_limit(Some(32_768));
        assert_eq!(cfg.resolved_context_limit(), 32_768);

        // for_model drops the override
        let rebased = cfg.for_model("gemini-1.5-pro");
        assert_eq!(rebased.resolved_context_limit(), 2_097_152);
    }

    #[test]
    fn test_backend_trait_is_object_safe() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn LlmBackend>();
    }
}
