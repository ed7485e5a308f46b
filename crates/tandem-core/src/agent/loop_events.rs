//! Event protocol for the agent loop.
//!
//! `LoopEvent` is everything the controller reports while it runs. The CLI
//! (or any other presentation layer) maps these onto its own output; nothing
//! in the loop depends on whether anyone is listening.

use serde::Serialize;

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingUserInput,
    RequestingCompletion,
    InspectingResponse,
    DispatchingTools,
    /// The last turn ended with a reply that requested no tools.
    Done,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    StateChanged { state: LoopState },

    /// A text block of the assistant's reply, in order.
    Text { text: String },

    // ── Tool lifecycle ─────────────────────────────────────────────────
    /// The call is waiting on an operator decision.
    ToolApprovalRequired {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    ToolApproved { id: String },

    ToolDenied { id: String, reason: String },

    ToolExecuting { id: String, name: String },

    ToolResult {
        id: String,
        output: String,
        is_error: bool,
    },

    // ── Turn lifecycle ─────────────────────────────────────────────────
    /// One completion round finished. `has_more` is set when tool results
    /// are about to be sent back.
    TurnComplete { turn: usize, has_more: bool },

    Error { error: String },

    /// The session loop exited.
    Finished { agent_id: String },
}
