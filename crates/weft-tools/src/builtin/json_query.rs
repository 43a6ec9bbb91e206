use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::template::{lookup_in, lookup_path};
use weft_core::traits::Tool;
use weft_core::types::ToolContext;

/// Extracts a dotted path from a JSON value, or from the execution's variables.
pub struct JsonQueryTool;

#[derive(Deserialize)]
struct JsonQueryInput {
    path: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    default: Option<Value>,
}

impl Tool for JsonQueryTool {
    fn name(&self) -> &str {
        "json_query"
    }

    fn description(&self) -> &str {
        "Extract a value by dotted path from `value`, or from workflow variables when `value` is omitted."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Dotted path, e.g. user.tags.0" },
                "value": { "description": "Document to query (default: workflow variables)" },
                "default": { "description": "Returned when the path does not resolve" }
            },
            "required": ["path"]
        })
    }

    fn execute(&self, params: Value, ctx: ToolContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let p: JsonQueryInput = serde_json::from_value(params)
                .map_err(|e| WeftError::ToolValidation(e.to_string()))?;

            let found = match &p.value {
                Some(doc) => lookup_path(doc, &p.path).cloned(),
                None => lookup_in(&ctx.variables, &p.path).cloned(),
            };

            Ok(found.or(p.default).unwrap_or(Value::Null))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn query_explicit_value() {
        let out = JsonQueryTool
            .execute(
                json!({"path": "a.b.1", "value": {"a": {"b": [10, 20]}}}),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!(20));
    }

    #[tokio::test]
    async fn query_variables() {
        let mut ctx = ToolContext::default();
        ctx.variables.insert("user".into(), json!({"name": "Ada"}));
        let out = JsonQueryTool
            .execute(json!({"path": "user.name"}), ctx)
            .await
            .unwrap();
        assert_eq!(out, json!("Ada"));
    }

    #[tokio::test]
    async fn query_default() {
        let out = JsonQueryTool
            .execute(json!({"path": "missing", "default": 0}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!(0));
    }

    #[tokio::test]
    async fn query_requires_path() {
        let err = JsonQueryTool
            .execute(json!({}), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::ToolValidation(_)));
    }
}
