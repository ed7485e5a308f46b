//! Tool registry and built-in tool implementations.

pub mod implementations;
pub mod registry;

pub use implementations::{register_coordination_tools, register_workspace_tools};
pub use registry::{
    error_envelope, parse_params, PermissionMode, Tool, ToolCategory, ToolContext, ToolRegistry,
};
