//! Agent loop
//!
//! - `ConversationController` - owns a session's history and runs the loop
//! - `LoopEvent` / `LoopState` - what the loop reports while it runs
//! - `ApprovalGate` - operator decisions for tool calls (`ChannelApprovalGate`,
//!   `PolicyGate`, `AutoApproveGate`)
//! - `PostToolHook` / `LoggingHook` - observe executed tool calls

pub mod approval;
mod executor;
pub mod hooks;
pub mod loop_events;
pub mod orchestrator;

pub use approval::{
    ApprovalDecision, ApprovalGate, ApprovalRequest, AutoApproveGate, ChannelApprovalGate,
    PolicyGate,
};
pub use hooks::{LoggingHook, PostToolHook};
pub use loop_events::{LoopEvent, LoopState};
pub use orchestrator::{ControllerConfig, ConversationController};
