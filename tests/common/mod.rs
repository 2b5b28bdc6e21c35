// tests/common/mod.rs
// Shared test doubles: a scriptable backend with call accounting.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use prism_engine::core::error::{EngineError, EngineResult, ErrorKind};
use prism_engine::llm::{Delegator, LlmBackend, Message, Pool, PoolRole};

/// A backend whose replies, failures, and latencies are scripted up front.
///
/// Scripted entries are consumed in call order; once the script is empty the
/// backend answers with its default reply. Reply/delay entries are popped at
/// call entry so that in parallel fan-outs entry order (chunk order) decides
/// which scripted entry a call gets, not completion order.
pub struct ScriptedBackend {
    model: String,
    context_limit: usize,
    token_ratio: usize,
    default_reply: String,
    script: Mutex<VecDeque<EngineResult<String>>>,
    delays: Mutex<VecDeque<Duration>>,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    inflight: Arc<AtomicUsize>,
    max_inflight: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(model: &str, context_limit: usize) -> Self {
        Self {
            model: model.to_string(),
            context_limit,
            token_ratio: 3,
            default_reply: format!("reply from {model}"),
            script: Mutex::new(VecDeque::new()),
            delays: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            inflight: Arc::new(AtomicUsize::new(0)),
            max_inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.default_reply = reply.to_string();
        self
    }

    pub fn with_script(self, script: Vec<EngineResult<String>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub fn with_delays(self, delays: Vec<Duration>) -> Self {
        *self.delays.lock().unwrap() = delays.into();
        self
    }

    /// Share the in-flight gauges with other backends so a fan-out's total
    /// concurrency can be observed.
    pub fn with_gauges(mut self, inflight: Arc<AtomicUsize>, max_inflight: Arc<AtomicUsize>) -> Self {
        self.inflight = inflight;
        self.max_inflight = max_inflight;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn max_inflight_seen(&self) -> usize {
        self.max_inflight.load(Ordering::SeqCst)
    }

    async fn answer(&self, prompt: &str) -> EngineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        // Pop the scripted entries before any await point; see type docs.
        let reply = self.script.lock().unwrap().pop_front();
        let delay = self.delays.lock().unwrap().pop_front();

        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inflight.fetch_max(current, Ordering::SeqCst);

        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        self.inflight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Some(result) => result,
            None => Ok(self.default_reply.clone()),
        }
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn provider(&self) -> &'static str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.token_ratio)
    }

    async fn generate(&self, prompt: &str, _deadline: Instant) -> EngineResult<String> {
        self.answer(prompt).await
    }

    async fn generate_from_history(
        &self,
        messages: &[Message],
        _deadline: Instant,
    ) -> EngineResult<String> {
        let joined: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        self.answer(&joined.join("\n")).await
    }
}

pub fn transient(model: &str) -> EngineError {
    EngineError::provider(model, ErrorKind::Transient, "simulated 503")
}

pub fn auth(model: &str) -> EngineError {
    EngineError::provider(model, ErrorKind::Auth, "simulated 401")
}

pub fn overflow(model: &str) -> EngineError {
    EngineError::provider(model, ErrorKind::ContextOverflow, "context_length_exceeded")
}

pub fn permanent(model: &str) -> EngineError {
    EngineError::provider(model, ErrorKind::Permanent, "simulated 400")
}

/// Pools + delegator over two scripted backends, no MoA, 512-token reserve.
pub fn delegator_over(
    proxy: Arc<ScriptedBackend>,
    base: Arc<ScriptedBackend>,
) -> (Delegator, Arc<Pool>, Arc<Pool>) {
    let proxy_pool = Arc::new(Pool::new(PoolRole::Proxy, proxy as Arc<dyn LlmBackend>));
    let base_pool = Arc::new(Pool::new(PoolRole::Base, base as Arc<dyn LlmBackend>));
    let delegator = Delegator::new(proxy_pool.clone(), base_pool.clone(), None, 512);
    (delegator, proxy_pool, base_pool)
}

/// A deadline far enough out that tests never trip it by accident.
pub fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}
