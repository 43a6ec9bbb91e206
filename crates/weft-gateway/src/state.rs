use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use weft_core::config::GatewayConfig;
use weft_core::traits::WorkflowStore;
use weft_engine::WorkflowEngine;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub engine: Arc<WorkflowEngine>,
    pub store: Arc<dyn WorkflowStore>,
    busy: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    pub fn new(config: GatewayConfig, engine: Arc<WorkflowEngine>, store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            config,
            engine,
            store,
            busy: Arc::default(),
        }
    }

    /// Exclusive right to change an execution's stored snapshot.
    ///
    /// `None` while another request or background run holds it. The guard
    /// releases on drop, so a run keeps it until its final save.
    pub fn lock_execution(&self, execution_id: &str) -> Option<ExecutionGuard> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(execution_id.to_string()) {
            return None;
        }
        Some(ExecutionGuard {
            busy: Arc::clone(&self.busy),
            execution_id: execution_id.to_string(),
        })
    }
}

pub struct ExecutionGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    execution_id: String,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.execution_id);
    }
}
