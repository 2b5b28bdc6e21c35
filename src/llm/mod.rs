// src/llm/mod.rs
// Model orchestration: providers, pools, routing, MoA, chunked context

pub mod catalog;
pub mod chunker;
pub mod context;
pub mod delegator;
pub mod moa;
pub mod pool;
pub mod prompts;
pub mod provider;
pub mod service;
pub mod tokens;
pub mod types;

// Export the facade and the types callers touch
pub use service::InferenceService;

pub use types::{GenerateRequest, Message, ModelHint, Response, Route, Strategy};

pub use chunker::{Chunk, ChunkPlan, ChunkStrategy, Chunker};
pub use context::{BackendAdapter, ContextManager, ProcessingMode, TextGenerator};
pub use delegator::Delegator;
pub use moa::{AgentSpec, MoaConfig, MoaPipeline};
pub use pool::{Pool, PoolRole};
pub use provider::{build_backend, BackendConfig, LlmBackend};
pub use tokens::TokenEstimator;
