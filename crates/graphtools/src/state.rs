use async_trait::async_trait;
use graphcore::{StateUpdate, Tool, ToolContext, ToolError, ToolMetadata, Value};

/// Write the node's params into the run's fields
pub struct SetStateTool;

#[async_trait]
impl Tool for SetStateTool {
    fn name(&self) -> &str {
        "state.set"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        Ok(ctx.params.into_iter().collect())
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Copy node params into the state".to_string(),
            category: "state".to_string(),
        }
    }
}

/// Add `by` (default 1) to the numeric field named by `field`.
/// A missing field counts as 0.
pub struct IncrementTool;

#[async_trait]
impl Tool for IncrementTool {
    fn name(&self) -> &str {
        "state.increment"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let field = ctx.require_param("field")?;
        let field = field
            .as_str()
            .ok_or_else(|| ToolError::Configuration("field must be a string".to_string()))?
            .to_string();

        let by = ctx
            .param_or("by", Value::from(1))
            .as_f64()
            .ok_or_else(|| ToolError::Configuration("by must be a number".to_string()))?;

        let current = if ctx.state.contains_key(&field) {
            ctx.require_number(&field)?
        } else {
            0.0
        };

        let mut update = StateUpdate::new();
        update.insert(field, Value::from(current + by));
        Ok(update)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Increment a numeric field".to_string(),
            category: "state".to_string(),
        }
    }
}
