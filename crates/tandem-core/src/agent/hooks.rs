//! Post-execution hooks
//!
//! Hooks observe every tool call the registry runs. They cannot change the
//! result.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::ToolError;

#[async_trait]
pub trait PostToolHook: Send + Sync {
    async fn after_execute(
        &self,
        name: &str,
        params: &Value,
        result: &Result<String, ToolError>,
        duration: Duration,
    );
}

/// Logs every tool execution with timing.
pub struct LoggingHook;

impl LoggingHook {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostToolHook for LoggingHook {
    async fn after_execute(
        &self,
        name: &str,
        _params: &Value,
        result: &Result<String, ToolError>,
        duration: Duration,
    ) {
        match result {
            Ok(output) => tracing::info!(
                tool = name,
                duration_ms = duration.as_millis() as u64,
                output_len = output.len(),
                "Tool execution completed"
            ),
            Err(e) => tracing::info!(
                tool = name,
                duration_ms = duration.as_millis() as u64,
                code = e.code(),
                error = %e,
                "Tool execution failed"
            ),
        }
    }
}
