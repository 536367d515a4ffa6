use async_trait::async_trait;
use graphcore::{StateUpdate, Tool, ToolContext, ToolError, ToolMetadata, Value};

/// Simple debug tool that logs the run's fields
pub struct DebugLogTool;

#[async_trait]
impl Tool for DebugLogTool {
    fn name(&self) -> &str {
        "debug.log"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let message = ctx.param_or("message", Value::from("(no message)"));
        let message = message.as_str().unwrap_or("(no message)");

        tracing::info!("DEBUG [{} / {}]: {}", ctx.run_id, ctx.node_id, message);

        // Also log all fields for visibility
        for (key, value) in &ctx.state {
            tracing::info!("  {}: {:?}", key, value);
        }

        Ok(StateUpdate::new())
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Logs the current fields for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
