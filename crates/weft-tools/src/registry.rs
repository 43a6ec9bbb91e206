use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{ToolContext, ToolDefinition};

use crate::function::FnTool;

/// Registry of tools callable from `tool` nodes.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Register an async closure as a tool.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(FnTool::new(name, f));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get tool definitions for workflow editors.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, params: Value, ctx: ToolContext) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| WeftError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());
        debug!(tool = %name, execution_id = %ctx.execution_id, "Executing tool");

        match tokio::time::timeout(timeout, tool.execute(params, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(WeftError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::echo::EchoTool);
        registry.register(crate::builtin::json_query::JsonQueryTool);
        registry.register(crate::builtin::http_request::HttpRequestTool);
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn execute_registered_closure() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("double", |params: Value, _ctx| async move {
            let n = params["n"].as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        });

        let out = registry
            .execute("double", json!({"n": 21}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nope", json!({}), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::ToolNotFound(name) if name == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(
            FnTool::new("slow", |_p, _c| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            })
            .with_timeout_secs(1),
        );

        let err = registry
            .execute("slow", json!({}), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::ToolTimeout { timeout_secs: 1, .. }));
    }

    #[test]
    fn builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.list(), vec!["echo", "http_request", "json_query"]);
        assert_eq!(registry.definitions().len(), 3);
    }

    #[test]
    fn unregister_removes() {
        let mut registry = ToolRegistry::with_builtins();
        assert!(registry.unregister("echo"));
        assert!(!registry.contains("echo"));
        assert!(!registry.unregister("echo"));
    }
}
