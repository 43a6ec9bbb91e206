pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod template;
pub mod traits;
pub mod types;
pub mod workflow;

pub use config::AppConfig;
pub use error::{Result, WeftError};
pub use event::{EventBus, ExecutionSubscription};
pub use execution::{
    ExecutionError, ExecutionHistoryEntry, ExecutionStatus, HistoryStatus, WaitingFor,
    WorkflowExecution,
};
pub use types::*;
pub use workflow::{BranchCondition, BranchOperator, Edge, Node, NodeKind, Workflow, WorkflowConfig};
