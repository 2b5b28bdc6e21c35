// src/llm/catalog.rs
// Known models per provider with their declared context windows.
// Backs the model listings exposed to callers and rebind validation.

use lazy_static::lazy_static;

/// One entry in the static model catalog.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub id: &'static str,
    pub provider: &'static str,
    /// Declared maximum input+output tokens.
    pub context_limit: usize,
}

/// Window assumed for models the catalog does not know.
pub const DEFAULT_CONTEXT_LIMIT: usize = 8192;

lazy_static! {
    static ref CATALOG: Vec<ModelInfo> = vec![
        // Cerebras-hosted models (proxy pool candidates)
        ModelInfo { id: "llama-4-scout-17b-16e-instruct", provider: "cerebras", context_limit: 8192 },
        ModelInfo { id: "llama3.1-8b", provider: "cerebras", context_limit: 8192 },
        ModelInfo { id: "llama-3.3-70b", provider: "cerebras", context_limit: 8192 },
        ModelInfo { id: "qwen-3-32b", provider: "cerebras", context_limit: 16384 },
        // Gemini models (base pool candidates)
        ModelInfo { id: "gemini-2.0-flash", provider: "gemini", context_limit: 1_048_576 },
        ModelInfo { id: "gemini-2.0-flash-lite", provider: "gemini", context_limit: 1_048_576 },
        ModelInfo { id: "gemini-2.5-flash", provider: "gemini", context_limit: 1_048_576 },
        ModelInfo { id: "gemini-1.5-pro", provider: "gemini", context_limit: 2_097_152 },
    ];
}

/// Look up a model by id.
pub fn lookup(model: &str) -> Option<&'static ModelInfo> {
    CATALOG.iter().find(|m| m.id == model)
}

/// The declared window for a model, or the conservative default.
pub fn context_limit_for(model: &str) -> usize {
    lookup(model)
        .map(|m| m.context_limit)
        .unwrap_or(DEFAULT_CONTEXT_LIMIT)
}

/// All catalog model ids for one provider, in catalog order.
pub fn models_for_provider(provider: &str) -> Vec<&'static str> {
    CATALOG
        .iter()
        .filter(|m| m.provider == provider)
        .map(|m| m.id)
        .collect()
}
