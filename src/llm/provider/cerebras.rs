// src/llm/provider/cerebras.rs
// Cerebras backend - OpenAI-compatible chat completions endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};

use super::{BackendConfig, LlmBackend};
use crate::core::error::{classify_status, classify_transport, EngineError, ErrorKind, EngineResult};
use crate::llm::tokens::TokenEstimator;
use crate::llm::types::{time_left, Message};

const CEREBRAS_API_URL: &str = "https://api.cerebras.ai/v1/chat/completions";

pub struct CerebrasBackend {
    client: Client,
    api_key: String,
    model: String,
    max_output_tokens: usize,
    context_limit: usize,
    temperature: Option<f32>,
    top_p: Option<f32>,
    estimator: TokenEstimator,
}

impl CerebrasBackend {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_output_tokens: cfg.max_output_tokens,
            context_limit: cfg.resolved_context_limit(),
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            estimator: TokenEstimator::new(cfg.token_ratio),
        }
    }

    fn build_body(&self, messages: &[Message]) -> Value {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "max_tokens": self.max_output_tokens,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = self.top_p {
            body["top_p"] = json!(p);
        }
        body
    }

    async fn chat_completion(&self, messages: &[Message], deadline: Instant) -> EngineResult<String> {
        let remaining = time_left(deadline, "cerebras request")?;
        let body = self.build_body(messages);

        debug!(model = %self.model, "Cerebras: sending chat completion request");

        let send = self
            .client
            .post(CEREBRAS_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();

        let response = match tokio::time::timeout(remaining, send).await {
            Err(_) => return Err(EngineError::DeadlineExpired("cerebras request".into())),
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
        let remaining = time_left(deadline, "cerebras response")?;
        let text = match tokio::time::timeout(remaining, response.text()).await {
            Err(_) => return Err(EngineError::DeadlineExpired("cerebras response".into())),
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
            warn!(model = %self.model, status = status.as_u16(), kind = %kind, "Cerebras: request failed");
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

        let content = parsed
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                EngineError::provider(
                    &self.model,
                    ErrorKind::Permanent,
                    "no choices or empty content in response",
                )
            })?;

        debug!(model = %self.model, chars = content.len(), "Cerebras: completion received");
        Ok(content.to_string())
    }
}

#[async_trait]
impl LlmBackend for CerebrasBackend {
    fn provider(&self) -> &'static str {
        "cerebras"
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
        let messages = [Message::user(prompt)];
        self.chat_completion(&messages, deadline).await
    }

    async fn generate_from_history(
        &self,
        messages: &[Message],
        deadline: Instant,
    ) -> EngineResult<String> {
        if messages.is_empty() {
            return Err(EngineError::provider(
                &self.model,
                ErrorKind::Permanent,
                "messages cannot be empty",
            ));
        }
        self.chat_completion(messages, deadline).await
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
