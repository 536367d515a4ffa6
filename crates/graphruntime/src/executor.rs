use crate::registry::ToolRegistry;
use crate::walker::Arrival;
use crate::RunHandle;
use futures::FutureExt;
use graphcore::{NodeSpec, Phase, RunError, ToolContext, ToolError};
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Invokes the tool bound to a node and folds its result into the run.
///
/// Every invocation logs exactly one `started` entry followed by exactly one
/// `completed` or `failed` entry. Any error returned from `execute` has
/// already been logged, except `StateSealed`, which cannot be.
pub struct NodeExecutor {
    registry: Arc<ToolRegistry>,
}

impl NodeExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub async fn execute(
        &self,
        node: &NodeSpec,
        run: &RunHandle,
        arrival: &Arrival,
    ) -> Result<(), RunError> {
        run.record(
            &node.id,
            Phase::Started,
            json!({ "tool": node.tool, "arrival": arrival }),
        )
        .await?;

        let Some(tool) = self.registry.get(&node.tool) else {
            let error = RunError::UnknownTool {
                node: node.id.clone(),
                tool: node.tool.clone(),
            };
            tracing::error!("Run {}: {}", run.id(), error);
            run.record(&node.id, Phase::Failed, failure_detail(&error)).await?;
            return Err(error);
        };

        let ctx = ToolContext {
            run_id: run.id(),
            node_id: node.id.clone(),
            state: run.fields().await,
            params: node.params.clone(),
            cancellation: run.cancellation().child_token(),
        };

        let start = Instant::now();
        let result = AssertUnwindSafe(tool.invoke(ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ToolError::Panicked(panic_message(panic.as_ref()))));
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(update) => {
                let changed = run.apply(&node.id, update, duration_ms).await?;
                tracing::info!(
                    "Run {}: node {} completed in {}ms, changed {:?}",
                    run.id(),
                    node.id,
                    duration_ms,
                    changed
                );
                Ok(())
            }
            Err(ToolError::Cancelled) if run.cancellation().is_cancelled() => {
                tracing::info!("Run {}: node {} stopped by cancellation", run.id(), node.id);
                let error = RunError::Cancelled;
                run.record(&node.id, Phase::Failed, failure_detail(&error)).await?;
                Err(error)
            }
            Err(source) => {
                let error = RunError::ToolExecution {
                    node: node.id.clone(),
                    tool: node.tool.clone(),
                    source,
                };
                tracing::error!("Run {}: {}", run.id(), error);
                run.record(&node.id, Phase::Failed, failure_detail(&error)).await?;
                Err(error)
            }
        }
    }
}

/// Detail object written with a `failed` log entry
pub fn failure_detail(error: &RunError) -> serde_json::Value {
    let mut detail = json!({
        "kind": error.kind(),
        "category": error.category(),
        "error": error.to_string(),
    });
    match error {
        RunError::ToolExecution { tool, source, .. } => {
            detail["tool"] = json!(tool);
            detail["tool_error"] = json!(source.to_string());
        }
        RunError::UnknownTool { tool, .. } => {
            detail["tool"] = json!(tool);
        }
        _ => {}
    }
    detail
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
