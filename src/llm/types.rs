// src/llm/types.rs
// Request/response values shared across the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::core::error::{EngineError, EngineResult};

/// Simple message format for all providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Which model the caller wants the request served by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ModelHint {
    /// Route by token estimate (the normal path).
    #[default]
    Auto,
    /// Force the proxy pool (fallback still applies).
    ProxyDefault,
    /// Force the base pool.
    BaseDefault,
    /// Force the MoA pipeline.
    Moa,
    /// A specific model that must be bound to one of the pools.
    Specific(String),
}

/// Generation strategy for a request.
#[derive(Debug, Clone, Default)]
pub enum Strategy {
    #[default]
    Simple,
    ChainOfThought,
    Reflection,
    /// Demand a JSON document matching the supplied schema.
    Structured(Value),
}

/// A single generation request. Immutable per call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Directive applied around the prompt (used per-chunk by the context manager).
    pub instruction: Option<String>,
    pub model: ModelHint,
    pub strategy: Strategy,
    /// Absolute cancellation anchor; None derives from the configured default.
    pub deadline: Option<Instant>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            instruction: None,
            model: ModelHint::Auto,
            strategy: Strategy::Simple,
            deadline: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_model(mut self, hint: ModelHint) -> Self {
        self.model = hint;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }
}

/// The pools/models that served (or tried to serve) a request, in attempt order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route(pub Vec<String>);

impl Route {
    pub fn single(model: impl Into<String>) -> Self {
        Self(vec![model.into()])
    }

    pub fn push(&mut self, model: impl Into<String>) {
        self.0.push(model.into());
    }

    /// Append another route's steps, skipping consecutive duplicates.
    pub fn extend(&mut self, other: Route) {
        for step in other.0 {
            if self.0.last().map(|s| s.as_str()) != Some(step.as_str()) {
                self.0.push(step);
            }
        }
    }

    /// Merge another route's steps, keeping each model at most once.
    /// Used when many sub-calls (chunks) share one response.
    pub fn absorb(&mut self, other: &Route) {
        for step in &other.0 {
            if !self.0.contains(step) {
                self.0.push(step.clone());
            }
        }
    }

    pub fn models(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(" -> "))
    }
}

/// A generation result.
///
/// `error` is set only for partial successes from chunked processing, where
/// the text contains the successful chunks plus error placeholders. Outright
/// failures are returned as `Err(EngineError)` instead.
#[derive(Debug, Clone)]
pub struct Response {
    pub text: String,
    pub route: Route,
    /// Schema echoed back for structured requests; validation is the caller's.
    pub schema: Option<Value>,
    pub error: Option<EngineError>,
}

impl Response {
    pub fn ok(text: impl Into<String>, route: Route) -> Self {
        Self {
            text: text.into(),
            route,
            schema: None,
            error: None,
        }
    }

    pub fn partial(text: impl Into<String>, route: Route, error: EngineError) -> Self {
        Self {
            text: text.into(),
            route,
            schema: None,
            error: Some(error),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

/// Time remaining until a deadline, or `Cancelled` if it already passed.
/// `operation` names the step for the error message.
pub fn time_left(deadline: Instant, operation: &str) -> EngineResult<Duration> {
    let now = Instant::now();
    if now >= deadline {
        Err(EngineError::DeadlineExpired(operation.to_string()))
    } else {
        Ok(deadline - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_display() {
        let mut route = Route::single("llama-4-scout-17b-16e-instruct");
        route.push("gemini-2.0-flash");
        assert_eq!(
            route.to_string(),
            "llama-4-scout-17b-16e-instruct -> gemini-2.0-flash"
        );
    }

    #[test]
    fn test_route_extend_skips_consecutive_duplicates() {
        let mut a = Route::single("m1");
        a.extend(Route(vec!["m1".into(), "m2".into(), "m2".into()]));
        assert_eq!(a.models(), &["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn test_time_left() {
        let future = Instant::now() + Duration::from_secs(10);
        assert!(time_left(future, "test").is_ok());

        let past = Instant::now() - Duration::from_millis(1);
        let err = time_left(past, "attempt").unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("attempt"));
    }

    #[test]
    fn test_request_builder() {
        let req = GenerateRequest::new("hello")
            .with_instruction("summarise")
            .with_model(ModelHint::BaseDefault)
            .with_timeout(Duration::from_secs(5));
        assert_eq!(req.prompt, "hello");
        assert!(req.deadline.is_some());
        assert_eq!(req.model, ModelHint::BaseDefault);
    }
}
