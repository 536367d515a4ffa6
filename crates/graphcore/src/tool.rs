use crate::{Fields, NodeId, RunId, StateUpdate, ToolError, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Core trait that every invocable tool implements
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key (e.g., "state.increment", "profile_data")
    fn name(&self) -> &str;

    /// Run the tool against a snapshot of the current state.
    ///
    /// The returned update is merged into the run's fields. Returning an
    /// error leaves the fields untouched.
    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError>;

    /// Optional: description and grouping shown by `list_tools`
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }
}

/// Everything a tool sees for a single invocation
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_id: RunId,

    /// Node that bound this invocation
    pub node_id: NodeId,

    /// Owned snapshot of the run's fields at invocation time
    pub state: Fields,

    /// Static parameters from the node spec
    pub params: HashMap<String, Value>,

    /// Fires when the run is cancelled
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(run_id: RunId, node_id: impl Into<NodeId>, state: Fields) -> Self {
        Self {
            run_id,
            node_id: node_id.into(),
            state,
            params: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Get a state field or return error
    pub fn require_field(&self, name: &str) -> Result<&Value, ToolError> {
        self.state
            .get(name)
            .ok_or_else(|| ToolError::MissingField(name.to_string()))
    }

    /// Numeric state field, failing on a wrong type
    pub fn require_number(&self, name: &str) -> Result<f64, ToolError> {
        let value = self.require_field(name)?;
        value.as_f64().ok_or_else(|| ToolError::InvalidFieldType {
            field: name.to_string(),
            expected: "number".to_string(),
            actual: value.type_name().to_string(),
        })
    }

    pub fn field_or(&self, name: &str, default: Value) -> Value {
        self.state.get(name).cloned().unwrap_or(default)
    }

    pub fn require_param(&self, name: &str) -> Result<&Value, ToolError> {
        self.params
            .get(name)
            .ok_or_else(|| ToolError::MissingParam(name.to_string()))
    }

    pub fn param_or(&self, name: &str, default: Value) -> Value {
        self.params.get(name).cloned().unwrap_or(default)
    }
}

/// Metadata about a tool
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ToolMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}
