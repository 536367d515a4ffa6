use async_trait::async_trait;
use graphcore::{StateUpdate, Tool, ToolContext, ToolError, ToolMetadata, Value};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayTool;

#[async_trait]
impl Tool for DelayTool {
    fn name(&self) -> &str {
        "time.delay"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let delay_ms = ctx.param_or("delay_ms", Value::from(1000));
        let delay_ms = delay_ms.as_f64().ok_or_else(|| {
            ToolError::Configuration(format!("delay_ms must be a number, got {}", delay_ms.type_name()))
        })?;
        if delay_ms < 0.0 {
            return Err(ToolError::Configuration("delay_ms must not be negative".to_string()));
        }

        tracing::debug!("Delaying for {}ms", delay_ms);

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms as u64)) => Ok(StateUpdate::new()),
            _ = ctx.cancellation.cancelled() => Err(ToolError::Cancelled),
        }
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
