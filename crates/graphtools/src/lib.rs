//! Standard tool library
//!
//! Collection of built-in tools for common operations, plus the
//! data-quality pipeline used as the reference workflow.

mod debug;
mod quality;
mod state;
mod time;
mod transform;

pub use debug::DebugLogTool;
pub use quality::{
    data_quality_graph, sample_dataset, ApplyRulesTool, GenerateRulesTool, IdentifyAnomaliesTool,
    ProfileDataTool,
};
pub use state::{IncrementTool, SetStateTool};
pub use time::DelayTool;
pub use transform::{TransformDataTool, ValidateDataTool};
use graphruntime::ToolRegistry;

use std::sync::Arc;

/// Register all standard tools with a registry
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(debug::DebugLogTool));
    registry.register(Arc::new(state::SetStateTool));
    registry.register(Arc::new(state::IncrementTool));
    registry.register(Arc::new(time::DelayTool));
    registry.register(Arc::new(transform::TransformDataTool));
    registry.register(Arc::new(transform::ValidateDataTool));
    register_data_quality(registry);
}

/// Register only the data-quality pipeline tools
pub fn register_data_quality(registry: &mut ToolRegistry) {
    registry.register(Arc::new(quality::ProfileDataTool));
    registry.register(Arc::new(quality::IdentifyAnomaliesTool));
    registry.register(Arc::new(quality::GenerateRulesTool));
    registry.register(Arc::new(quality::ApplyRulesTool));
}
