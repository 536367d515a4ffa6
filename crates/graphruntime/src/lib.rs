//! Graph execution runtime
//!
//! This crate provides the engine that walks compiled graphs: the tool
//! registry, the per-node executor, the walker, and the run manager that
//! creates, drives and exposes runs.

mod executor;
mod handle;
mod registry;
mod runtime;
mod storage;
mod walker;

pub use executor::{failure_detail, NodeExecutor};
pub use handle::RunHandle;
pub use registry::{FnTool, ToolRegistry};
pub use runtime::{GraphRuntime, GraphTarget, RunOutcome, RuntimeConfig, RuntimeStats};
pub use storage::{InMemoryStorage, Storage};
pub use walker::{resolve_next, Arrival, GraphWalker};
