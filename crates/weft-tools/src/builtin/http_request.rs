use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::ToolContext;

/// Make an HTTP request and return `{status, headers, body}`.
pub struct HttpRequestTool;

#[derive(Deserialize)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".into()
}

impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn timeout_secs(&self) -> u64 {
        60
    }

    fn description(&self) -> &str {
        "Make an HTTP request. Returns status, headers, and body (parsed as JSON when possible)."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string", "description": "HTTP method (default: GET)" },
                "headers": { "type": "object", "description": "Request headers" },
                "body": { "description": "Request body; objects are sent as JSON" }
            },
            "required": ["url"]
        })
    }

    fn execute(&self, params: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let p: HttpRequestInput = serde_json::from_value(params)
                .map_err(|e| WeftError::ToolValidation(e.to_string()))?;
            let method = p
                .method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|e| WeftError::ToolValidation(format!("Invalid method: {}", e)))?;

            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| tool_error(e.to_string()))?;

            debug!(url = %p.url, %method, "HTTP request");

            let mut req = client.request(method, &p.url);
            for (k, v) in &p.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            req = match p.body {
                Some(Value::String(text)) => req.body(text),
                Some(Value::Null) | None => req,
                Some(json) => req.json(&json),
            };

            let resp = req.send().await.map_err(|e| tool_error(e.to_string()))?;
            let status = resp.status().as_u16();
            let headers: serde_json::Map<String, Value> = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|v| (k.to_string(), Value::String(v.to_string())))
                })
                .collect();
            let text = resp.text().await.map_err(|e| tool_error(e.to_string()))?;
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

            Ok(serde_json::json!({
                "status": status,
                "headers": headers,
                "body": body,
            }))
        })
    }
}

fn tool_error(message: String) -> WeftError {
    WeftError::ToolExecution {
        tool: "http_request".into(),
        message,
    }
}
