use std::future::Future;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::Result;
use weft_core::traits::Tool;
use weft_core::types::ToolContext;

/// Adapts an async closure `(params, ctx) -> Result<Value>` into a [`Tool`].
pub struct FnTool<F> {
    name: String,
    description: String,
    timeout_secs: u64,
    f: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            timeout_secs: 30,
            f,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn execute(&self, params: Value, ctx: ToolContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin((self.f)(params, ctx))
    }
}
