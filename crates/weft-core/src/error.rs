use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Node errors
    #[error("Node {node_id} failed: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("Parameter resolution failed: {0}")]
    Resolve(String),

    #[error("Condition error: {0}")]
    Condition(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Dispatch errors
    #[error("Agent task {message_id} timed out after {timeout_ms}ms")]
    DispatchTimeout { message_id: String, timeout_ms: u64 },

    #[error("Agent task {message_id} failed: {message}")]
    DispatchFailed { message_id: String, message: String },

    #[error("Agent task {message_id} cancelled")]
    DispatchCancelled { message_id: String },

    #[error("Inbox request failed: {0}")]
    Inbox(String),

    #[error("Council request failed: {0}")]
    Council(String),

    // Graph errors
    #[error("Traversal error: {0}")]
    Traversal(String),

    // Lifecycle errors
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Execution already registered: {0}")]
    DuplicateExecution(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;
