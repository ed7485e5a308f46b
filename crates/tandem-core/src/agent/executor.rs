//! Tool dispatch for the agent loop.
//!
//! Every call in an assistant message gets exactly one result, in the order
//! the calls appeared. Unknown tools, denials, tool failures and cancellation
//! all produce error results instead of aborting the batch.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::types::{AiToolCall, Content};
use crate::error::ToolError;
use crate::tools::registry::{error_envelope, ToolContext, ToolRegistry};

use super::approval::{ApprovalDecision, ApprovalGate, ApprovalRequest};
use super::loop_events::LoopEvent;

const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

pub(crate) struct Dispatch<'a> {
    pub registry: &'a ToolRegistry,
    pub gate: &'a dyn ApprovalGate,
    pub tool_ctx: &'a ToolContext,
    pub approval_timeout: Duration,
    pub event_tx: &'a mpsc::UnboundedSender<LoopEvent>,
    pub cancel: &'a CancellationToken,
}

/// Resolve a batch of tool calls into `ToolResult` blocks.
pub(crate) async fn execute_tools(calls: &[AiToolCall], dispatch: &Dispatch<'_>) -> Vec<Content> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        let (output, is_error) = execute_one(call, dispatch).await;
        let _ = dispatch.event_tx.send(LoopEvent::ToolResult {
            id: call.id.clone(),
            output: output.clone(),
            is_error,
        });
        results.push(Content::tool_result(&call.id, output, is_error));
    }
    results
}

async fn execute_one(call: &AiToolCall, dispatch: &Dispatch<'_>) -> (String, bool) {
    let event_tx = dispatch.event_tx;

    if dispatch.cancel.is_cancelled() {
        return (error_envelope("cancelled", "cancelled before execution"), true);
    }

    if dispatch.registry.get(&call.name).is_none() {
        tracing::warn!(tool = %call.name, "Model requested an unknown tool");
        return (
            error_envelope("tool_not_found", format!("tool not found: {}", call.name)),
            true,
        );
    }

    // ── Approval ───────────────────────────────────────────────────
    if dispatch.gate.requires_operator(&call.name) {
        let _ = event_tx.send(LoopEvent::ToolApprovalRequired {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
    }
    let request = ApprovalRequest::new(&dispatch.tool_ctx.agent_id, &call.name, &call.arguments);
    match dispatch
        .gate
        .request(request, dispatch.approval_timeout, dispatch.cancel)
        .await
    {
        ApprovalDecision::Approved => {
            let _ = event_tx.send(LoopEvent::ToolApproved {
                id: call.id.clone(),
            });
        }
        ApprovalDecision::Denied { reason } => {
            tracing::info!(tool = %call.name, reason = %reason, "Tool call denied");
            let _ = event_tx.send(LoopEvent::ToolDenied {
                id: call.id.clone(),
                reason: reason.clone(),
            });
            return (
                error_envelope("approval_denied", format!("tool call denied: {}", reason)),
                true,
            );
        }
    }

    // ── Execution ──────────────────────────────────────────────────
    let _ = event_tx.send(LoopEvent::ToolExecuting {
        id: call.id.clone(),
        name: call.name.clone(),
    });

    let result = tokio::select! {
        biased;
        _ = dispatch.cancel.cancelled() => Err(ToolError::Failed("cancelled".to_string())),
        result = dispatch.registry.execute(&call.name, call.arguments.clone(), dispatch.tool_ctx) => {
            result.unwrap_or_else(|| Err(ToolError::Failed(format!("tool not found: {}", call.name))))
        }
    };

    match result {
        Ok(output) => (truncate_output(&output), false),
        Err(e) => (error_envelope(e.code(), &e), true),
    }
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, MAX_TOOL_OUTPUT_CHARS);
    let truncated = &output[..truncated_len];
    let clean = match truncated.rfind('\n') {
        Some(break_point) => &output[..break_point],
        None => truncated,
    };
    format!(
        "{}\n\n[... OUTPUT TRUNCATED: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_output("abc"), "abc");
    }

    #[test]
    fn long_output_is_cut_on_a_line_boundary() {
        let line = "x".repeat(99);
        let output = vec![line.as_str(); 500].join("\n");
        let truncated = truncate_output(&output);

        assert!(truncated.len() < output.len());
        let (body, marker) = truncated.split_once("\n\n[... OUTPUT TRUNCATED").unwrap();
        assert!(body.lines().all(|l| l.len() == 99));
        assert!(marker.contains(&output.len().to_string()));
    }

    #[test]
    fn multibyte_text_without_newlines_is_cut_safely() {
        let output = "é".repeat(MAX_TOOL_OUTPUT_CHARS);
        let truncated = truncate_output(&output);
        assert!(truncated.contains("OUTPUT TRUNCATED"));
    }
}
