// src/config/mod.rs
// Central configuration for the Prism engine

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::core::error::{EngineError, EngineResult};

/// Main configuration structure, read from the environment at startup.
///
/// API keys follow the provider name (`CEREBRAS_API_KEY`, `GEMINI_API_KEY`);
/// everything else is prefixed `PRISM_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrismConfig {
    // ===== PROXY POOL (primary, strict window) =====
    pub proxy_provider: String,
    pub proxy_api_key: String,
    pub proxy_model: String,
    pub proxy_max_output_tokens: usize,
    /// Override for the declared window used in routing; None uses the catalog.
    pub proxy_context_limit: Option<usize>,

    // ===== BASE POOL (fallback, large window) =====
    pub base_provider: String,
    pub base_api_key: String,
    pub base_model: String,
    pub base_max_output_tokens: usize,
    pub base_context_limit: Option<usize>,

    // ===== MOA PIPELINE =====
    pub moa_enabled: bool,
    pub moa_iterations: usize,
    /// Ordered agent roster. Each entry is `proxy`, `base`, or a catalog model id.
    pub moa_agents: Vec<String>,
    pub moa_max_parallel: usize,
    pub moa_agent_timeout_secs: u64,

    // ===== REQUEST DEFAULTS =====
    pub default_deadline_secs: u64,
    /// Output budget reserved when deciding whether a prompt fits the proxy.
    pub reserved_output_tokens: usize,

    // ===== CHUNKING DEFAULTS =====
    pub chunk_max_size: usize,
    pub chunk_overlap: usize,
    pub chunk_strategy: String,
    pub chunk_mode: String,

    // ===== TOKEN ESTIMATION =====
    /// Characters per token when no tokenizer is available for a family.
    pub conservative_token_ratio: usize,

    // ===== LOGGING =====
    pub log_level: String,
}

impl PrismConfig {
    pub fn from_env() -> Self {
        // Load .env if present; missing file is fine in production
        dotenv::dotenv().ok();

        let proxy_provider = env_or("PRISM_PROXY_PROVIDER", "cerebras");
        let base_provider = env_or("PRISM_BASE_PROVIDER", "gemini");

        Self {
            proxy_api_key: provider_key(&proxy_provider),
            proxy_model: env_or("PRISM_PROXY_MODEL", "llama-4-scout-17b-16e-instruct"),
            proxy_max_output_tokens: env_usize("PRISM_PROXY_MAX_OUTPUT_TOKENS", 5000),
            proxy_context_limit: env_opt_usize("PRISM_PROXY_CONTEXT_LIMIT"),
            proxy_provider,

            base_api_key: provider_key(&base_provider),
            base_model: env_or("PRISM_BASE_MODEL", "gemini-2.0-flash"),
            base_max_output_tokens: env_usize("PRISM_BASE_MAX_OUTPUT_TOKENS", 150_000),
            base_context_limit: env_opt_usize("PRISM_BASE_CONTEXT_LIMIT"),
            base_provider,

            moa_enabled: env_bool("PRISM_MOA_ENABLED", true),
            moa_iterations: env_usize("PRISM_MOA_ITERATIONS", 2),
            moa_agents: env_list("PRISM_MOA_AGENTS", &["proxy", "base"]),
            moa_max_parallel: env_usize("PRISM_MOA_MAX_PARALLEL", 2),
            moa_agent_timeout_secs: env_u64("PRISM_MOA_AGENT_TIMEOUT_SECS", 60),

            default_deadline_secs: env_u64("PRISM_DEFAULT_DEADLINE_SECS", 120),
            reserved_output_tokens: env_usize("PRISM_RESERVED_OUTPUT_TOKENS", 512),

            chunk_max_size: env_usize("PRISM_CHUNK_MAX_SIZE", 1000),
            chunk_overlap: env_usize("PRISM_CHUNK_OVERLAP", 0),
            chunk_strategy: env_or("PRISM_CHUNK_STRATEGY", "token"),
            chunk_mode: env_or("PRISM_CHUNK_MODE", "parallel"),

            conservative_token_ratio: env_usize("PRISM_TOKEN_RATIO", 3),

            log_level: env_or("PRISM_LOG_LEVEL", "info"),
        }
    }

    /// Validate config on startup.
    pub fn validate(&self) -> EngineResult<()> {
        if self.conservative_token_ratio == 0 {
            return Err(EngineError::Config(
                "PRISM_TOKEN_RATIO must be at least 1".into(),
            ));
        }
        if self.chunk_max_size == 0 {
            return Err(EngineError::Config(
                "PRISM_CHUNK_MAX_SIZE must be positive".into(),
            ));
        }
        if self.moa_iterations == 0 {
            return Err(EngineError::Config(
                "PRISM_MOA_ITERATIONS must be at least 1".into(),
            ));
        }
        if self.moa_max_parallel == 0 {
            return Err(EngineError::Config(
                "PRISM_MOA_MAX_PARALLEL must be at least 1".into(),
            ));
        }
        if self.moa_enabled && self.moa_agents.is_empty() {
            return Err(EngineError::Config(
                "PRISM_MOA_AGENTS must list at least one agent".into(),
            ));
        }
        if !["paragraph", "sentence", "token"].contains(&self.chunk_strategy.as_str()) {
            return Err(EngineError::Config(format!(
                "invalid PRISM_CHUNK_STRATEGY '{}': must be paragraph/sentence/token",
                self.chunk_strategy
            )));
        }
        if !["parallel", "sequential"].contains(&self.chunk_mode.as_str()) {
            return Err(EngineError::Config(format!(
                "invalid PRISM_CHUNK_MODE '{}': must be parallel/sequential",
                self.chunk_mode
            )));
        }
        Ok(())
    }

    /// Deadline applied when the caller does not supply one.
    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }

    pub fn moa_agent_timeout(&self) -> Duration {
        Duration::from_secs(self.moa_agent_timeout_secs)
    }
}

// ===== HELPER FUNCTIONS =====

/// API keys are named after the provider: `CEREBRAS_API_KEY`, `GEMINI_API_KEY`.
fn provider_key(provider: &str) -> String {
    let name = format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"));
    env::var(&name).unwrap_or_default()
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PrismConfig {
        PrismConfig {
            proxy_provider: "cerebras".into(),
            proxy_api_key: "test".into(),
            proxy_model: "llama-4-scout-17b-16e-instruct".into(),
            proxy_max_output_tokens: 5000,
            proxy_context_limit: None,
            base_provider: "gemini".into(),
            base_api_key: "test".into(),
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

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_ratio_rejected() {
        let mut cfg = base_config();
        cfg.conservative_token_ratio = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_strategy_rejected() {
        let mut cfg = base_config();
        cfg.chunk_strategy = "words".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_empty_moa_agents_rejected_when_enabled() {
        let mut cfg = base_config();
        cfg.moa_agents.clear();
        assert!(cfg.validate().is_err());
        cfg.moa_enabled = false;
        assert!(cfg.validate().is_ok());
    }
}
