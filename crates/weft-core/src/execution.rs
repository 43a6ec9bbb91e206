use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, WeftError};
use crate::workflow::Node;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingFor {
    HumanInput,
}

/// One attempt at one node. Never mutated after it leaves `Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHistoryEntry {
    pub node_id: String,
    pub status: HistoryStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<WaitingFor>,
}

/// The node and message that failed a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub node_id: String,
    pub message: String,
}

/// Mutable state of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub inputs: Map<String, Value>,
    pub history: Vec<ExecutionHistoryEntry>,
    pub variables: Map<String, Value>,
    pub node_outputs: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: Option<Map<String, Value>>,
    #[serde(default)]
    pub error: Option<ExecutionError>,
    #[serde(default)]
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            variables: inputs.clone(),
            inputs,
            history: vec![],
            node_outputs: HashMap::new(),
            outputs: None,
            error: None,
            current_node_id: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, rejecting anything outside the status state machine.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(WeftError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    /// Append a `running` entry for `node_id` and return its index.
    pub fn begin_node(&mut self, node_id: &str) -> usize {
        self.current_node_id = Some(node_id.to_string());
        self.history.push(ExecutionHistoryEntry {
            node_id: node_id.to_string(),
            status: HistoryStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error: None,
            waiting_for: None,
        });
        self.history.len() - 1
    }

    pub fn complete_node(&mut self, index: usize, output: Option<Value>) {
        if let Some(entry) = self.open_entry(index) {
            entry.status = HistoryStatus::Completed;
            entry.completed_at = Some(Utc::now());
            entry.output = output;
        }
    }

    pub fn fail_node(&mut self, index: usize, error: impl Into<String>) {
        if let Some(entry) = self.open_entry(index) {
            entry.status = HistoryStatus::Failed;
            entry.completed_at = Some(Utc::now());
            entry.error = Some(error.into());
        }
    }

    pub fn skip_node(&mut self, index: usize) {
        if let Some(entry) = self.open_entry(index) {
            entry.status = HistoryStatus::Skipped;
            entry.completed_at = Some(Utc::now());
        }
    }

    /// Flag a running entry as blocked on external input.
    pub fn mark_waiting(&mut self, index: usize, waiting_for: WaitingFor) {
        if let Some(entry) = self.open_entry(index) {
            entry.waiting_for = Some(waiting_for);
        }
    }

    fn open_entry(&mut self, index: usize) -> Option<&mut ExecutionHistoryEntry> {
        self.history
            .get_mut(index)
            .filter(|e| e.status == HistoryStatus::Running)
    }

    /// Index of the entry currently blocked on human input, if any.
    pub fn waiting_entry(&self) -> Option<usize> {
        self.history.iter().rposition(|e| {
            e.status == HistoryStatus::Running && e.waiting_for == Some(WaitingFor::HumanInput)
        })
    }

    /// Store a node's output under its id and its variable name.
    pub fn bind_output(&mut self, node: &Node, output: Value) {
        self.node_outputs.insert(node.id.clone(), output.clone());
        self.variables
            .insert(node.variable_name().to_string(), output);
    }

    pub fn has_completed(&self, node_id: &str) -> bool {
        self.history
            .iter()
            .any(|e| e.node_id == node_id && e.status == HistoryStatus::Completed)
    }

    /// Every node with a history entry in this run.
    pub fn entered_nodes(&self) -> HashSet<String> {
        self.history.iter().map(|e| e.node_id.clone()).collect()
    }

    pub fn entry_for(&self, node_id: &str) -> Option<&ExecutionHistoryEntry> {
        self.history.iter().rev().find(|e| e.node_id == node_id)
    }
}
