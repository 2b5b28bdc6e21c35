// src/llm/pool.rs
// A pool is a named slot holding the currently-active backend for one role.
//
// Readers capture an Arc snapshot and use it for the whole operation; swap
// replaces the binding atomically without touching captured references, so
// in-flight requests finish against the backend they started with.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::provider::LlmBackend;

/// The two standard pool roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    /// Smaller-context, often-faster primary.
    Proxy,
    /// Larger-context fallback.
    Base,
}

impl PoolRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolRole::Proxy => "proxy",
            PoolRole::Base => "base",
        }
    }
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Pool {
    role: PoolRole,
    current: RwLock<Arc<dyn LlmBackend>>,
}

impl Pool {
    pub fn new(role: PoolRole, backend: Arc<dyn LlmBackend>) -> Self {
        info!(role = %role, model = backend.model_id(), "Pool: bound initial backend");
        Self {
            role,
            current: RwLock::new(backend),
        }
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    /// Snapshot of the currently-bound backend. Callers hold the returned
    /// reference for the duration of one operation and never re-read the
    /// pool mid-operation.
    pub async fn get(&self) -> Arc<dyn LlmBackend> {
        self.current.read().await.clone()
    }

    /// Atomically replace the binding, returning the previous backend.
    /// The Arc refcount keeps the old backend alive for any operation that
    /// captured it before the swap.
    pub async fn swap(&self, backend: Arc<dyn LlmBackend>) -> Arc<dyn LlmBackend> {
        let mut slot = self.current.write().await;
        let old = std::mem::replace(&mut *slot, backend);
        info!(
            role = %self.role,
            old_model = old.model_id(),
            new_model = slot.model_id(),
            "Pool: backend swapped"
        );
        old
    }

    /// The model id of the current binding.
    pub async fn model_id(&self) -> String {
        self.current.read().await.model_id().to_string()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("role", &self.role).finish()
    }
}
