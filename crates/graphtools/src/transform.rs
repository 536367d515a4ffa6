use async_trait::async_trait;
use graphcore::{StateUpdate, Tool, ToolContext, ToolError, ToolMetadata, Value};

/// Double every number in `data`
pub struct TransformDataTool;

#[async_trait]
impl Tool for TransformDataTool {
    fn name(&self) -> &str {
        "transform_data"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let data = ctx.field_or("data", Value::Array(Vec::new()));

        let transformed = match data {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Number(n) => Value::Number(n * 2.0),
                        other => other,
                    })
                    .collect(),
            ),
            other => other,
        };

        let mut update = StateUpdate::new();
        update.insert("transformed_data".to_string(), transformed);
        Ok(update)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Double the numbers in data".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Check that `data` is a non-empty list
pub struct ValidateDataTool;

#[async_trait]
impl Tool for ValidateDataTool {
    fn name(&self) -> &str {
        "validate_data"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let is_valid = ctx
            .state
            .get("data")
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty());

        let mut update = StateUpdate::new();
        update.insert("is_valid".to_string(), Value::from(is_valid));
        update.insert(
            "validation_result".to_string(),
            Value::from(if is_valid { "passed" } else { "failed" }),
        );
        Ok(update)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Check that data is a non-empty list".to_string(),
            category: "transform".to_string(),
        }
    }
}
