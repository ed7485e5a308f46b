//! Built-in tools
//!
//! - read: Read files
//! - write: Create/overwrite files
//! - edit: Exact text replacement
//! - list: List directory contents
//! - bash: Execute shell commands
//! - broadcast_status: Publish this agent's coordination record
//! - observe_peers: Read peers' coordination records

pub mod bash;
pub mod coordination;
pub mod edit;
pub mod list;
pub mod read;
pub mod write;

pub use bash::BashTool;
pub use coordination::{BroadcastStatusTool, ObservePeersTool};
pub use edit::EditTool;
pub use list::ListTool;
pub use read::ReadTool;
pub use write::WriteTool;

use std::sync::Arc;
use std::time::Duration;

use crate::coordination::{CoordinationBroadcaster, CoordinationObserver, TransportKind, Transports};
use crate::tools::registry::ToolRegistry;

/// Register the file and shell tools.
pub fn register_workspace_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ReadTool));
    registry.register(Arc::new(WriteTool));
    registry.register(Arc::new(EditTool));
    registry.register(Arc::new(ListTool));
    registry.register(Arc::new(BashTool));
}

/// Register `broadcast_status` and `observe_peers` on top of `transports`.
pub fn register_coordination_tools(
    registry: &mut ToolRegistry,
    transports: &Transports,
    default_transport: TransportKind,
    browse_window: Duration,
) {
    registry.register(Arc::new(BroadcastStatusTool::new(
        CoordinationBroadcaster::new(transports.clone()),
        default_transport,
    )));
    registry.register(Arc::new(ObservePeersTool::new(
        CoordinationObserver::new(transports.clone()),
        default_transport,
        browse_window,
    )));
}
