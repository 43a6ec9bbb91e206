use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::types::AgentOutcome;

use crate::dispatch::{settlement, PendingTasks};

/// Per-run state reachable from outside the traversal.
pub struct ExecutionHandle {
    pub execution_id: String,
    pub workflow_id: String,
    pub registered_at: DateTime<Utc>,
    pending: Arc<PendingTasks>,
    cancel: CancellationToken,
}

impl ExecutionHandle {
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let execution_id = execution_id.into();
        Self {
            pending: Arc::new(PendingTasks::new(execution_id.clone(), event_bus)),
            execution_id,
            workflow_id: workflow_id.into(),
            registered_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn pending(&self) -> &Arc<PendingTasks> {
        &self.pending
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drop outstanding agent tasks. Their dispatches observe a cancellation.
    pub fn teardown(&self) -> usize {
        self.pending.teardown()
    }
}

/// Process-wide map of in-flight executions, used to route inbound callbacks.
#[derive(Default)]
pub struct ExecutionRegistry {
    executions: RwLock<HashMap<String, Arc<ExecutionHandle>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<ExecutionHandle>) -> Result<()> {
        let mut executions = self.executions.write().unwrap_or_else(PoisonError::into_inner);
        if executions.contains_key(&handle.execution_id) {
            return Err(WeftError::DuplicateExecution(handle.execution_id.clone()));
        }
        debug!(execution_id = %handle.execution_id, "Execution registered");
        executions.insert(handle.execution_id.clone(), handle);
        Ok(())
    }

    /// Remove an execution and tear down its pending tasks.
    pub fn remove(&self, execution_id: &str) -> Option<Arc<ExecutionHandle>> {
        let handle = self
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(execution_id)?;
        handle.teardown();
        debug!(execution_id, "Execution unregistered");
        Some(handle)
    }

    pub fn get(&self, execution_id: &str) -> Option<Arc<ExecutionHandle>> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(execution_id)
            .cloned()
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.get(execution_id).is_some()
    }

    /// The execution with a pending task for `message_id`.
    pub fn find_by_message(&self, message_id: &str) -> Option<Arc<ExecutionHandle>> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|h| h.pending.contains(message_id))
            .cloned()
    }

    /// Route an inbound result to its pending task. False if nothing was waiting.
    pub fn deliver(&self, message_id: &str, outcome: AgentOutcome) -> bool {
        let Some(handle) = self.find_by_message(message_id) else {
            debug!(message_id, "Callback for unknown or settled message");
            return false;
        };
        let delivered = handle.pending.settle(message_id, settlement(message_id, outcome));
        if delivered {
            info!(execution_id = %handle.execution_id, message_id, "Callback settled agent task");
        }
        delivered
    }

    /// Cancel an in-flight execution and tear down its pending tasks.
    pub fn cancel(&self, execution_id: &str) -> bool {
        let Some(handle) = self.get(execution_id) else {
            return false;
        };
        handle.cancel.cancel();
        handle.teardown();
        info!(execution_id, "Cancellation requested");
        true
    }

    pub fn ids(&self) -> Vec<String> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> Arc<ExecutionHandle> {
        Arc::new(ExecutionHandle::new(id, "wf", Arc::new(EventBus::default())))
    }

    #[test]
    fn register_rejects_duplicates() {
        let registry = ExecutionRegistry::new();
        registry.register(handle("e1")).unwrap();
        let err = registry.register(handle("e1")).unwrap_err();
        assert!(matches!(err, WeftError::DuplicateExecution(id) if id == "e1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_and_lookup() {
        let registry = ExecutionRegistry::new();
        registry.register(handle("e1")).unwrap();
        assert!(registry.contains("e1"));
        assert!(registry.remove("e1").is_some());
        assert!(registry.remove("e1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn deliver_unknown_message() {
        let registry = ExecutionRegistry::new();
        registry.register(handle("e1")).unwrap();
        assert!(!registry.deliver("nope", AgentOutcome::Completed(serde_json::Value::Null)));
    }

    #[test]
    fn cancel_sets_token() {
        let registry = ExecutionRegistry::new();
        let h = handle("e1");
        registry.register(Arc::clone(&h)).unwrap();
        assert!(registry.cancel("e1"));
        assert!(h.is_cancelled());
        assert!(!registry.cancel("missing"));
    }
}
