use crate::{GraphId, NodeId, RunId, RunStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Graph not found: {0}")]
    GraphNotFound(GraphId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// True for the variants a transport should map to "404".
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::GraphNotFound(_) | EngineError::RunNotFound(_))
    }
}

/// Errors returned by a tool invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Missing required state field: {0}")]
    MissingField(String),

    #[error("Invalid type for '{field}': expected {expected}, got {actual}")]
    InvalidFieldType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Missing required parameter: {0}")]
    MissingParam(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Tool panicked: {0}")]
    Panicked(String),
}

/// Malformed graph definitions, detected before any run starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Graph must declare an entry node")]
    MissingEntry,

    #[error("Entry node '{0}' is not declared")]
    UnknownEntry(NodeId),

    #[error("Node '{0}' is declared more than once")]
    DuplicateNode(NodeId),

    #[error("Node '{0}' has an empty tool name")]
    EmptyTool(NodeId),

    #[error("Edge {from} -> {to} references an undeclared node")]
    DanglingEdge { from: NodeId, to: NodeId },

    #[error("Node '{0}' has more than one unconditional edge")]
    AmbiguousEdges(NodeId),

    #[error("Loop on '{node}' references undeclared node '{missing}'")]
    UnknownLoopNode { node: NodeId, missing: NodeId },

    #[error("Loop on '{0}' has an empty body")]
    EmptyLoopBody(NodeId),

    #[error("Loop on '{0}' must allow at least one iteration")]
    InvalidLoopBound(NodeId),

    #[error("Node '{0}' has more than one loop")]
    DuplicateLoop(NodeId),

    #[error("Loop body node '{body}' of loop '{node}' is itself a loop entry")]
    NestedLoop { node: NodeId, body: NodeId },
}

/// Failures that end a run. Recorded as a `failed` log entry and attached
/// to the run record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("Node '{node}' references unknown tool '{tool}'")]
    UnknownTool { node: NodeId, tool: String },

    #[error("Tool '{tool}' failed on node '{node}': {source}")]
    ToolExecution {
        node: NodeId,
        tool: String,
        #[source]
        source: ToolError,
    },

    #[error("No outgoing edge of '{0}' matched the current state")]
    NoMatchingEdge(NodeId),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Run exceeded the step limit of {limit}")]
    StepLimitExceeded { limit: usize },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("State is sealed; run already finished")]
    StateSealed,

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunStatus, to: RunStatus },
}

impl RunError {
    /// Stable identifier written to the `kind` field of log details.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::UnknownTool { .. } => "unknown_tool",
            RunError::ToolExecution { .. } => "tool_error",
            RunError::NoMatchingEdge(_) => "no_matching_edge",
            RunError::NodeNotFound(_) => "node_not_found",
            RunError::StepLimitExceeded { .. } => "step_limit_exceeded",
            RunError::Cancelled => "cancelled",
            RunError::StateSealed => "state_sealed",
            RunError::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Coarse grouping: tool failures versus edge resolution versus run control.
    pub fn category(&self) -> &'static str {
        match self {
            RunError::UnknownTool { .. } | RunError::ToolExecution { .. } => "tool",
            RunError::NoMatchingEdge(_) | RunError::NodeNotFound(_) => "routing",
            _ => "control",
        }
    }
}
