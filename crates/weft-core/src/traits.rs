use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::execution::WorkflowExecution;
use crate::types::*;
use crate::workflow::Workflow;

/// Tool: a named async function callable from `tool` nodes.
pub trait Tool: Send + Sync + 'static {
    /// Tool name referenced by workflow nodes.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the resolved parameter object.
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// Execute the tool with resolved parameters and an execution snapshot.
    fn execute(&self, params: Value, ctx: ToolContext) -> BoxFuture<'_, Result<Value>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Inbox client: the external message system agents are reached through.
pub trait InboxClient: Send + Sync + 'static {
    /// Deliver a task. The receipt may or may not carry a message id.
    fn send(&self, message: OutboundMessage) -> BoxFuture<'_, Result<SendReceipt>>;

    /// Current status of a message.
    fn status(&self, message_id: &str) -> BoxFuture<'_, Result<MessageStatus>>;
}

/// Council client: multi-model prompt fan-out.
pub trait CouncilClient: Send + Sync + 'static {
    fn query(&self, prompt: String, models: Vec<String>) -> BoxFuture<'_, Result<CouncilResult>>;
}

/// Workflow store: persistence backend for templates and run snapshots.
pub trait WorkflowStore: Send + Sync + 'static {
    fn save_workflow(&self, workflow: &Workflow) -> BoxFuture<'_, Result<()>>;

    fn load_workflow(&self, id: &str) -> BoxFuture<'_, Result<Option<Workflow>>>;

    fn list_workflows(&self) -> BoxFuture<'_, Result<Vec<WorkflowSummary>>>;

    /// Returns true if a workflow was removed.
    fn delete_workflow(&self, id: &str) -> BoxFuture<'_, Result<bool>>;

    fn save_execution(&self, execution: &WorkflowExecution) -> BoxFuture<'_, Result<()>>;

    fn load_execution(&self, id: &str) -> BoxFuture<'_, Result<Option<WorkflowExecution>>>;

    fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> BoxFuture<'_, Result<Vec<ExecutionSummary>>>;

    /// Returns true if an execution was removed.
    fn delete_execution(&self, id: &str) -> BoxFuture<'_, Result<bool>>;
}
