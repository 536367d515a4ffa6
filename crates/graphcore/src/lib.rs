//! Core abstractions for the graph engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: values and state, graph definitions and their
//! validation, predicates, run records, events, and the error taxonomy.

mod error;
pub mod events;
mod graph;
mod predicate;
mod run;
mod state;
mod tool;
mod value;

pub use error::{EngineError, RunError, ToolError, ValidationError};
pub use events::{EventBroadcaster, EventEmitter, EventStream, RunEvent};
pub use graph::{
    ConditionalEdge, Edge, Graph, GraphDefinition, GraphId, LoopBody, LoopSpec, NodeId, NodeSpec,
};
pub use predicate::{CompareOp, Condition, CustomPredicate, Predicate};
pub use run::{Run, RunFailure, RunId, RunStatus, RunSummary};
pub use state::{Fields, LogEntry, Phase, StateContainer, StateUpdate};
pub use tool::{Tool, ToolContext, ToolMetadata};
pub use value::Value;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
