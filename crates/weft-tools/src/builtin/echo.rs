use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::Result;
use weft_core::traits::Tool;
use weft_core::types::ToolContext;

/// Returns its resolved parameters unchanged.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the resolved parameter object unchanged."
    }

    fn execute(&self, params: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { Ok(params) })
    }
}
