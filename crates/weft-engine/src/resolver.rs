use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::execution::WorkflowExecution;
use weft_core::template::{interpolate, lookup_in, lookup_path};

/// Borrowed view of the execution state a parameter can read from.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub inputs: &'a Map<String, Value>,
    pub node_outputs: &'a HashMap<String, Value>,
    pub variables: &'a Map<String, Value>,
}

impl<'a> ResolveContext<'a> {
    pub fn from_execution(execution: &'a WorkflowExecution) -> Self {
        Self {
            inputs: &execution.inputs,
            node_outputs: &execution.node_outputs,
            variables: &execution.variables,
        }
    }
}

/// Named data source for `reference` parameters.
pub trait SourceFn: Send + Sync + 'static {
    fn fetch<'a>(&'a self, path: &'a str, ctx: &'a ResolveContext<'a>) -> BoxFuture<'a, Result<Value>>;
}

/// Adapts an async closure over the reference path into a [`SourceFn`].
struct FnSource<F>(F);

impl<F, Fut> SourceFn for FnSource<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn fetch<'a>(&'a self, path: &'a str, _ctx: &'a ResolveContext<'a>) -> BoxFuture<'a, Result<Value>> {
        Box::pin((self.0)(path.to_string()))
    }
}

/// Turns node parameter declarations into concrete values.
///
/// A parameter is either a plain value, or an object tagged by `type`:
///
/// - `{"type": "static", "value": V}` yields `V`
/// - `{"type": "template", "template": "..."}` interpolates against the variables
/// - `{"type": "reference", "source": S, "path": P}` reads `P` from source `S`
///
/// Registered sources shadow the built-in `input`, `node` and `variable` sources.
#[derive(Default)]
pub struct ParameterResolver {
    sources: HashMap<String, Arc<dyn SourceFn>>,
}

impl ParameterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&mut self, name: impl Into<String>, source: Arc<dyn SourceFn>) {
        self.sources.insert(name.into(), source);
    }

    /// Register an async closure `(path) -> Result<Value>` as a source.
    pub fn register_fn_source<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_source(name, Arc::new(FnSource(f)));
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub async fn resolve(&self, param: &Value, ctx: &ResolveContext<'_>) -> Result<Value> {
        let Some(obj) = param.as_object() else {
            return Ok(param.clone());
        };

        match obj.get("type").and_then(Value::as_str) {
            Some("static") => Ok(obj.get("value").cloned().unwrap_or(Value::Null)),
            Some("template") => {
                let template = obj.get("template").and_then(Value::as_str).unwrap_or_default();
                Ok(Value::String(interpolate(template, ctx.variables)))
            }
            Some("reference") => {
                let source = obj
                    .get("source")
                    .and_then(Value::as_str)
                    .ok_or_else(|| WeftError::Resolve("reference without a source".into()))?;
                let path = obj.get("path").and_then(Value::as_str).unwrap_or_default();
                self.reference(source, path, ctx).await
            }
            _ => Ok(param.clone()),
        }
    }

    async fn reference(&self, source: &str, path: &str, ctx: &ResolveContext<'_>) -> Result<Value> {
        if let Some(custom) = self.sources.get(source) {
            debug!(source, path, "Resolving from registered source");
            return custom.fetch(path, ctx).await;
        }

        let found = match source {
            "input" => lookup_in(ctx.inputs, path),
            "variable" => lookup_in(ctx.variables, path),
            "node" => {
                let (node_id, rest) = path.split_once('.').unwrap_or((path, ""));
                ctx.node_outputs
                    .get(node_id)
                    .and_then(|output| lookup_path(output, rest))
            }
            other => return Err(WeftError::Resolve(format!("unknown source: {}", other))),
        };
        Ok(found.cloned().unwrap_or(Value::Null))
    }

    /// Resolve every entry of a node's parameter map.
    pub async fn resolve_all(
        &self,
        params: &Map<String, Value>,
        ctx: &ResolveContext<'_>,
    ) -> Result<Value> {
        let mut resolved = Map::with_capacity(params.len());
        for (name, param) in params {
            let value = self.resolve(param, ctx).await?;
            resolved.insert(name.clone(), value);
        }
        Ok(Value::Object(resolved))
    }
}
