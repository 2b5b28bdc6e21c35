// src/llm/moa.rs
// Mixture-of-Agents: several backends answer each iteration, an aggregator
// consolidates, and later iterations refine the previous consolidation.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::error::{EngineError, EngineResult, ErrorKind};
use crate::llm::prompts;
use crate::llm::provider::{build_backend, BackendConfig, LlmBackend};
use crate::llm::types::time_left;

type AgentFactory = Box<dyn Fn() -> EngineResult<Arc<dyn LlmBackend>> + Send + Sync>;

/// One agent slot in the roster. Each iteration materialises a fresh backend
/// from it.
pub struct AgentSpec {
    label: String,
    factory: AgentFactory,
}

impl AgentSpec {
    /// Agent backed by provider configuration (the normal path).
    pub fn from_config(cfg: BackendConfig) -> Self {
        let label = cfg.model.clone();
        Self {
            label,
            factory: Box::new(move || build_backend(&cfg)),
        }
    }

    /// Agent backed by an arbitrary factory. Lets tests and embedders supply
    /// pre-built backends.
    pub fn from_factory(
        label: impl Into<String>,
        factory: impl Fn() -> EngineResult<Arc<dyn LlmBackend>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            factory: Box::new(factory),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn materialize(&self) -> EngineResult<Arc<dyn LlmBackend>> {
        (self.factory)()
    }
}

impl std::fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSpec").field("label", &self.label).finish()
    }
}

/// MoA pipeline parameters.
#[derive(Debug)]
pub struct MoaConfig {
    pub iterations: usize,
    /// Ordered roster; aggregation sees outputs in this order.
    pub agents: Vec<AgentSpec>,
    /// Maximum concurrent agent calls per iteration.
    pub max_parallel: usize,
    /// Bound on one agent call.
    pub agent_timeout: Duration,
}

pub struct MoaPipeline {
    config: MoaConfig,
    aggregator: Arc<dyn LlmBackend>,
}

impl MoaPipeline {
    pub fn new(config: MoaConfig, aggregator: Arc<dyn LlmBackend>) -> EngineResult<Self> {
        if config.iterations == 0 {
            return Err(EngineError::Config("MoA iterations must be at least 1".into()));
        }
        if config.agents.is_empty() {
            return Err(EngineError::Config("MoA agent roster is empty".into()));
        }
        if config.max_parallel == 0 {
            return Err(EngineError::Config("MoA max_parallel must be at least 1".into()));
        }
        info!(
            iterations = config.iterations,
            agents = config.agents.len(),
            max_parallel = config.max_parallel,
            aggregator = aggregator.model_id(),
            "MoA: pipeline configured"
        );
        Ok(Self { config, aggregator })
    }

    pub fn iterations(&self) -> usize {
        self.config.iterations
    }

    pub fn agent_count(&self) -> usize {
        self.config.agents.len()
    }

    /// Route entry describing this pipeline for response observability.
    pub fn route_label(&self) -> String {
        let labels: Vec<&str> = self.config.agents.iter().map(|a| a.label()).collect();
        format!("moa[{}=>{}]", labels.join("+"), self.aggregator.model_id())
    }

    /// Run the full pipeline for one prompt.
    pub async fn generate(&self, prompt: &str, deadline: Instant) -> EngineResult<String> {
        let mut aggregate: Option<String> = None;

        for iteration in 1..=self.config.iterations {
            time_left(deadline, "moa iteration")?;

            let iteration_prompt = match &aggregate {
                None => prompt.to_string(),
                Some(prev) => prompts::moa_iteration(prompt, prev),
            };

            debug!(iteration, "MoA: starting iteration");
            let outputs = self.run_agents(&iteration_prompt, iteration, deadline).await?;

            time_left(deadline, "moa aggregation")?;
            let agg_prompt = prompts::aggregate(prompt, &outputs);
            let consolidated = self.aggregator.generate(&agg_prompt, deadline).await?;
            debug!(iteration, chars = consolidated.len(), "MoA: iteration aggregated");
            aggregate = Some(consolidated);
        }

        aggregate.ok_or_else(|| EngineError::Config("MoA ran zero iterations".into()))
    }

    /// Run one iteration's agents with at most `max_parallel` in flight.
    /// Successful outputs are returned in roster order; individual failures
    /// are recorded and tolerated unless every agent fails.
    async fn run_agents(
        &self,
        iteration_prompt: &str,
        iteration: usize,
        deadline: Instant,
    ) -> EngineResult<Vec<String>> {
        let agent_timeout = self.config.agent_timeout;

        type AgentCall =
            std::pin::Pin<Box<dyn std::future::Future<Output = (String, EngineResult<String>)> + Send>>;
        let mut calls: Vec<AgentCall> = Vec::with_capacity(self.config.agents.len());
        for spec in self.config.agents.iter() {
            let label = spec.label().to_string();
            let backend = spec.materialize();
            let prompt = iteration_prompt.to_string();
            calls.push(Box::pin(run_one_agent(label, backend, prompt, deadline, agent_timeout)));
        }

        // buffered() caps concurrency and yields results in roster order, so
        // the aggregation prompt is deterministic given deterministic agents.
        let results: Vec<(String, EngineResult<String>)> = stream::iter(calls)
            .buffered(self.config.max_parallel)
            .collect()
            .await;

        let total = results.len();
        let mut outputs = Vec::with_capacity(total);
        for (label, result) in results {
            match result {
                Ok(text) => outputs.push(text),
                Err(e) => {
                    warn!(agent = %label, iteration, error = %e, "MoA: agent failed");
                }
            }
        }

        if outputs.is_empty() {
            // Distinguish a dead deadline from a bad iteration.
            time_left(deadline, "moa iteration")?;
            return Err(EngineError::AllAgentsFailed {
                agents: total,
                iteration,
            });
        }

        debug!(
            iteration,
            succeeded = outputs.len(),
            total,
            "MoA: iteration agents complete"
        );
        Ok(outputs)
    }
}

/// Run one timed generation call against an already-materialized backend. A
/// plain (non-closure) async fn taking only owned data, so the future boxed
/// per iteration in `run_agents` is `'static` and doesn't trip up the borrow
/// checker's HRTB inference for `Send` futures.
async fn run_one_agent(
    label: String,
    backend: EngineResult<Arc<dyn LlmBackend>>,
    prompt: String,
    deadline: Instant,
    agent_timeout: Duration,
) -> (String, EngineResult<String>) {
    let backend = match backend {
        Ok(b) => b,
        Err(e) => return (label, Err(e)),
    };
    let result = match tokio::time::timeout(agent_timeout, backend.generate(&prompt, deadline)).await
    {
        Err(_) => Err(EngineError::provider(
            &label,
            ErrorKind::Transient,
            format!("agent timed out after {agent_timeout:?}"),
        )),
        Ok(r) => r,
    };
    (label, result)
}

impl std::fmt::Debug for MoaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoaPipeline")
            .field("iterations", &self.config.iterations)
            .field("agents", &self.config.agents.len())
            .field("max_parallel", &self.config.max_parallel)
            .field("aggregator", &self.aggregator.model_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cerebras_cfg() -> BackendConfig {
        BackendConfig::new("cerebras", "key", "llama3.1-8b")
    }

    fn pipeline(iterations: usize, max_parallel: usize) -> EngineResult<MoaPipeline> {
        let config = MoaConfig {
            iterations,
            agents: vec![AgentSpec::from_config(cerebras_cfg())],
            max_parallel,
            agent_timeout: Duration::from_secs(60),
        };
        let aggregator = build_backend(&BackendConfig::new("gemini", "key", "gemini-2.0-flash"))?;
        MoaPipeline::new(config, aggregator)
    }

    #[test]
    fn test_validation() {
        assert!(pipeline(0, 2).is_err());
        assert!(pipeline(2, 0).is_err());
        assert!(pipeline(2, 2).is_ok());

        let empty = MoaConfig {
            iterations: 1,
            agents: vec![],
            max_parallel: 1,
            agent_timeout: Duration::from_secs(60),
        };
        let aggregator =
            build_backend(&BackendConfig::new("gemini", "key", "gemini-2.0-flash")).unwrap();
        assert!(MoaPipeline::new(empty, aggregator).is_err());
    }

    #[test]
    fn test_route_label_lists_agents_and_aggregator() {
        let p = pipeline(2, 2).unwrap();
        let label = p.route_label();
        assert!(label.starts_with("moa["));
        assert!(label.contains("llama3.1-8b"));
        assert!(label.contains("gemini-2.0-flash"));
    }

    #[tokio::test]
    async fn test_expired_deadline_cancels() {
        let p = pipeline(1, 1).unwrap();
        let past = Instant::now() - Duration::from_millis(1);
        let err = p.generate("hi", past).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
