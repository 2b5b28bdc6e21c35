// src/llm/provider/gemini.rs
// Gemini backend - generateContent endpoint via reqwest

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};

use super::{BackendConfig, LlmBackend};
use crate::core::error::{classify_status, classify_transport, EngineError, ErrorKind, EngineResult};
use crate::llm::tokens::TokenEstimator;
use crate::llm::types::{time_left, Message};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    max_output_tokens: usize,
    context_limit: usize,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    estimator: TokenEstimator,
}

impl GeminiBackend {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_output_tokens: cfg.max_output_tokens,
            context_limit: cfg.resolved_context_limit(),
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            top_k: cfg.top_k,
            estimator: TokenEstimator::new(cfg.token_ratio),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        )
    }

    fn generation_config(&self) -> Value {
        let mut config = json!({ "maxOutputTokens": self.max_output_tokens });
        if let Some(t) = self.temperature {
            config["temperature"] = json!(t);
        }
        if let Some(p) = self.top_p {
            config["topP"] = json!(p);
        }
        if let Some(k) = self.top_k {
            config["topK"] = json!(k);
        }
        config
    }

    /// Gemini speaks "user"/"model" roles; assistant maps to model and
    /// anything else is dropped with a warning.
    fn build_contents(&self, messages: &[Message]) -> Vec<Value> {
        let mut contents = Vec::with_capacity(messages.len());
        for msg in messages {
            let role = match msg.role.as_str() {
                "user" | "system" => "user",
                "assistant" | "model" => "model",
                other => {
                    warn!(role = other, "Gemini: dropping message with unsupported role");
                    continue;
                }
            };
            contents.push(json!({
                "role": role,
                "parts": [{ "text": msg.content }]
            }));
        }
        contents
    }

    async fn generate_content(&self, contents: Vec<Value>, deadline: Instant) -> EngineResult<String> {
        let remaining = time_left(deadline, "gemini request")?;
        let body = json!({
            "contents": contents,
            "generationConfig": self.generation_config(),
        });

        debug!(model = %self.model, "Gemini: sending generateContent request");

        let send = self.client.post(self.endpoint()).json(&body).send();

        let response = match tokio::time::timeout(remaining, send).await {
            Err(_) => return Err(EngineError::DeadlineExpired("gemini request".into())),
            Ok(Err(e)) => {
                return Err(EngineError::provider(
                    &self.model,
                    classify_transport(&e),
                    format!("request failed: {e}"),
                ))
            }
            Ok(Ok(resp)) => resp,
        };

        let status = response.status();
        let remaining = time_left(deadline, "gemini response")?;
        let text = match tokio::time::timeout(remaining, response.text()).await {
            Err(_) => return Err(EngineError::DeadlineExpired("gemini response".into())),
            Ok(Err(e)) => {
                return Err(EngineError::provider(
                    &self.model,
                    classify_transport(&e),
                    format!("failed to read response body: {e}"),
                ))
            }
            Ok(Ok(t)) => t,
        };

        if !status.is_success() {
            let kind = classify_status(status.as_u16(), &text);
            warn!(model = %self.model, status = status.as_u16(), kind = %kind, "Gemini: request failed");
            return Err(EngineError::provider(
                &self.model,
                kind,
                format!("status {status}: {}", truncate(&text, 500)),
            ));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            EngineError::provider(
                &self.model,
                ErrorKind::Permanent,
                format!("malformed response JSON: {e}"),
            )
        })?;

        let parts = parsed
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .ok_or_else(|| {
                EngineError::provider(&self.model, ErrorKind::Permanent, "empty response from Gemini")
            })?;

        let mut result = String::new();
        for part in parts {
            if let Some(text_part) = part.get("text").and_then(|t| t.as_str()) {
                result.push_str(text_part);
            }
        }
        if result.is_empty() {
            return Err(EngineError::provider(
                &self.model,
                ErrorKind::Permanent,
                "no text parts in Gemini response",
            ));
        }

        debug!(model = %self.model, chars = result.len(), "Gemini: completion received");
        Ok(result)
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn provider(&self) -> &'static str {
        "gemini"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.estimator.estimate_for_model(text, &self.model)
    }

    async fn generate(&self, prompt: &str, deadline: Instant) -> EngineResult<String> {
        let contents = vec![json!({
            "role": "user",
            "parts": [{ "text": prompt }]
        })];
        self.generate_content(contents, deadline).await
    }

    async fn generate_from_history(
        &self,
        messages: &[Message],
        deadline: Instant,
    ) -> EngineResult<String> {
        let contents = self.build_contents(messages);
        if contents.is_empty() {
            return Err(EngineError::provider(
                &self.model,
                ErrorKind::Permanent,
                "no usable messages in history",
            ));
        }
        self.generate_content(contents, deadline).await
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> GeminiBackend {
        let cfg = BackendConfig::new("gemini", "test-key", "gemini-2.0-flash")
            .with_max_output_tokens(1024);
        GeminiBackend::new(&cfg)
    }

    #[test]
    fn test_endpoint_includes_model_and_key() {
        let url = backend().endpoint();
        assert!(url.contains("/gemini-2.0-flash:generateContent"));
        assert!(url.ends_with("key=test-key"));
    }

    #[test]
    fn test_generation_config() {
        let mut cfg = BackendConfig::new("gemini", "k", "gemini-2.0-flash");
        cfg.temperature = Some(0.1);
        cfg.top_k = Some(40);
        let b = GeminiBackend::new(&cfg);
        let gc = b.generation_config();
        assert_eq!(gc["maxOutputTokens"], 1024);
        assert!(gc.get("temperature").is_some());
        assert_eq!(gc["topK"], 40);
        assert!(gc.get("topP").is_none());
    }

    #[test]
    fn test_roles_mapped_for_gemini() {
        let b = backend();
        let contents = b.build_contents(&[
            Message::system("be terse"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message {
                role: "tool".into(),
                content: "ignored".into(),
            },
        ]);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "user");
        assert_eq!(contents[2]["role"], "model");
    }

    #[test]
    fn test_context_limit_from_catalog() {
        assert_eq!(backend().context_limit(), 1_048_576);
    }

    #[tokio::test]
    async fn test_expired_deadline_short_circuits() {
        let b = backend();
        let past = Instant::now() - std::time::Duration::from_millis(1);
        let err = b.generate("hi", past).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
