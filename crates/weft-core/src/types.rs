use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::execution::{ExecutionStatus, WorkflowExecution};

/// Snapshot of the calling execution handed to tools.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub node_id: String,
    pub inputs: Map<String, Value>,
    pub variables: Map<String, Value>,
    pub node_outputs: HashMap<String, Value>,
}

impl ToolContext {
    pub fn from_execution(execution: &WorkflowExecution, node_id: &str) -> Self {
        Self {
            execution_id: execution.id.clone(),
            workflow_id: execution.workflow_id.clone(),
            node_id: node_id.to_string(),
            inputs: execution.inputs.clone(),
            variables: execution.variables.clone(),
            node_outputs: execution.node_outputs.clone(),
        }
    }
}

/// Tool definition exposed to workflow editors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ── Inbox ───────────────────────────────────────────────────────

/// Status vocabulary of inbox messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Pending,
    Approved,
    InProgress,
    Completed,
    Failed,
    Rejected,
}

impl InboxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

/// A task sent to an external agent's inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub from: String,
    pub task: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub execution_id: String,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// What the inbox returned for a send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendReceipt {
    #[serde(default, alias = "id")]
    pub message_id: Option<String>,
}

/// Status report for a previously sent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStatus {
    pub status: InboxStatus,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MessageStatus {
    /// The settlement carried by this report, if it is terminal.
    pub fn outcome(&self) -> Option<AgentOutcome> {
        match self.status {
            InboxStatus::Completed => Some(AgentOutcome::Completed(
                self.response.clone().unwrap_or(Value::Null),
            )),
            InboxStatus::Failed | InboxStatus::Rejected => Some(AgentOutcome::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| format!("agent reported {:?}", self.status).to_lowercase()),
            )),
            _ => None,
        }
    }
}

/// Result of an agent task, from polling or an inbound callback.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Completed(Value),
    Failed(String),
}

// ── Council ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilResponse {
    pub model: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouncilResult {
    pub responses: Vec<CouncilResponse>,
}

// ── Persistence ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
}

// ── Events ──────────────────────────────────────────────────────

/// Execution event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Traversal started (or restarted after a resume).
    Started { execution_id: String, workflow_id: String },
    NodeStarted { execution_id: String, node_id: String, node_type: &'static str },
    NodeCompleted { execution_id: String, node_id: String },
    NodeFailed { execution_id: String, node_id: String, error: String },
    /// An agent task was handed to the inbox.
    AgentDispatched { execution_id: String, node_id: String, message_id: String },
    /// A pending agent task was settled by poll, callback or timeout.
    AgentSettled { execution_id: String, message_id: String, succeeded: bool },
    Paused { execution_id: String, node_id: String },
    Finished { execution_id: String, status: ExecutionStatus },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            Self::Started { execution_id, .. }
            | Self::NodeStarted { execution_id, .. }
            | Self::NodeCompleted { execution_id, .. }
            | Self::NodeFailed { execution_id, .. }
            | Self::AgentDispatched { execution_id, .. }
            | Self::AgentSettled { execution_id, .. }
            | Self::Paused { execution_id, .. }
            | Self::Finished { execution_id, .. } => execution_id,
        }
    }
}
