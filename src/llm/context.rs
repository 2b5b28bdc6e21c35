// src/llm/context.rs
// Chunked processing of inputs too large for a single model window.
//
// Parallel mode fans chunks out concurrently and reassembles in chunk-index
// order; sequential mode threads a rolling summary of each output into the
// next chunk's prompt and fails fast, because later chunks depend on earlier
// outputs.

use async_trait::async_trait;
use futures::future::join_all;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::core::error::{EngineError, EngineResult, ErrorKind};
use crate::llm::chunker::{split_sentences, ChunkPlan, ChunkStrategy, Chunker};
use crate::llm::prompts;
use crate::llm::provider::LlmBackend;
use crate::llm::types::{Response, Route};

/// Sentences of the previous output carried into the next chunk's prompt.
const ROLLING_SUMMARY_SENTENCES: usize = 3;

/// How chunks are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// All chunks concurrently; no context flows between them.
    Parallel,
    /// One at a time, each prompt carrying a summary of the previous output.
    Sequential,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Parallel => "parallel",
            ProcessingMode::Sequential => "sequential",
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(ProcessingMode::Parallel),
            "sequential" => Ok(ProcessingMode::Sequential),
            other => Err(EngineError::Config(format!(
                "unknown processing mode '{other}'"
            ))),
        }
    }
}

/// The minimal generation interface chunk processing needs. The delegator
/// implements this, so chunks flow through routing and fallback; a bare
/// backend can be plugged in through [`BackendAdapter`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str, deadline: Instant) -> EngineResult<(String, Route)>;
}

/// Adapts a single backend to [`TextGenerator`], bypassing routing.
pub struct BackendAdapter {
    backend: Arc<dyn LlmBackend>,
}

impl BackendAdapter {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TextGenerator for BackendAdapter {
    async fn generate_text(&self, prompt: &str, deadline: Instant) -> EngineResult<(String, Route)> {
        let text = self.backend.generate(prompt, deadline).await?;
        Ok((text, Route::single(self.backend.model_id())))
    }
}

/// Drives chunked processing of one large input.
pub struct ContextManager {
    chunker: Chunker,
    strategy: ChunkStrategy,
    mode: ProcessingMode,
}

impl ContextManager {
    pub fn new(chunker: Chunker, strategy: ChunkStrategy, mode: ProcessingMode) -> Self {
        Self {
            chunker,
            strategy,
            mode,
        }
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Chunk `text`, process every chunk through `generator` with
    /// `instruction` applied, and reassemble in chunk-index order.
    pub async fn process(
        &self,
        generator: &dyn TextGenerator,
        text: &str,
        instruction: &str,
        deadline: Instant,
    ) -> EngineResult<Response> {
        let plan = self.chunker.split(text, self.strategy);
        if plan.is_empty() {
            return Err(EngineError::EmptyPlan);
        }

        info!(
            chunks = plan.len(),
            strategy = plan.strategy.as_str(),
            mode = self.mode.as_str(),
            "ContextManager: processing plan"
        );

        match self.mode {
            ProcessingMode::Parallel => self.process_parallel(generator, &plan, instruction, deadline).await,
            ProcessingMode::Sequential => {
                self.process_sequential(generator, &plan, instruction, deadline).await
            }
        }
    }

    async fn process_parallel(
        &self,
        generator: &dyn TextGenerator,
        plan: &ChunkPlan,
        instruction: &str,
        deadline: Instant,
    ) -> EngineResult<Response> {
        let total = plan.len();
        let futures = plan.chunks.iter().enumerate().map(|(i, chunk)| {
            let prompt = prompts::parallel_chunk(instruction, &chunk.text);
            async move {
                debug!(chunk = i + 1, total, "ContextManager: processing chunk in parallel");
                generator.generate_text(&prompt, deadline).await
            }
        });

        // join_all preserves input order, so reassembly below is by chunk index
        // regardless of completion order.
        let results = join_all(futures).await;

        let mut parts: Vec<String> = Vec::with_capacity(total);
        let mut route = Route::default();
        let mut failures: Vec<(usize, EngineError)> = Vec::new();

        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok((text, chunk_route)) => {
                    route.absorb(&chunk_route);
                    parts.push(text);
                }
                Err(err) => {
                    warn!(chunk = i + 1, error = %err, "ContextManager: chunk failed");
                    parts.push(prompts::chunk_error_placeholder(i + 1));
                    failures.push((i + 1, err));
                }
            }
        }

        let text = parts.join(prompts::CHUNK_SEPARATOR);

        if failures.is_empty() {
            info!(total, "ContextManager: all chunks processed");
            return Ok(Response::ok(text, route));
        }

        let composite = composite_chunk_error(&failures, total);
        Ok(Response::partial(text, route, composite))
    }

    async fn process_sequential(
        &self,
        generator: &dyn TextGenerator,
        plan: &ChunkPlan,
        instruction: &str,
        deadline: Instant,
    ) -> EngineResult<Response> {
        let total = plan.len();
        let mut parts: Vec<String> = Vec::with_capacity(total);
        let mut route = Route::default();
        let mut summary: Option<String> = None;

        for (i, chunk) in plan.chunks.iter().enumerate() {
            let prompt = match &summary {
                None => prompts::sequential_first(instruction, &chunk.text),
                Some(s) => prompts::sequential_followup(instruction, s, &chunk.text),
            };

            debug!(chunk = i + 1, total, "ContextManager: processing chunk sequentially");

            match generator.generate_text(&prompt, deadline).await {
                Ok((text, chunk_route)) => {
                    route.absorb(&chunk_route);
                    summary = Some(summarize_for_context(&text));
                    parts.push(text);
                }
                Err(err) => {
                    // Later chunks depend on this output, so stop here and
                    // surface what we have alongside the error.
                    warn!(chunk = i + 1, error = %err, "ContextManager: sequential chunk failed, stopping");
                    parts.push(prompts::chunk_error_placeholder(i + 1));
                    let text = parts.join(prompts::CHUNK_SEPARATOR);
                    return Ok(Response::partial(text, route, err));
                }
            }
        }

        info!(total, "ContextManager: all chunks processed sequentially");
        Ok(Response::ok(parts.join(prompts::CHUNK_SEPARATOR), route))
    }
}

/// The rolling summary: the last few sentences of the previous output.
/// Short outputs are carried whole.
fn summarize_for_context(text: &str) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= ROLLING_SUMMARY_SENTENCES {
        return text.trim().to_string();
    }
    sentences[sentences.len() - ROLLING_SUMMARY_SENTENCES..].join(" ")
}

/// Fold per-chunk failures into one error of the worst observed kind.
fn composite_chunk_error(failures: &[(usize, EngineError)], total: usize) -> EngineError {
    let kind = failures
        .iter()
        .fold(ErrorKind::Cancelled, |acc, (_, e)| acc.worse(e.kind()));
    let indices: Vec<String> = failures.iter().map(|(i, _)| i.to_string()).collect();
    let first = &failures[0].1;
    EngineError::ChunksFailed {
        kind,
        failed: failures.len(),
        total,
        message: format!("chunks [{}]; first error: {}", indices.join(", "), first),
    }
}
