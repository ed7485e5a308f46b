//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;

use crate::ai::provider::Provider;
use crate::ai::types::{AiTool, ModelMessage};
use crate::error::{ProviderError, ToolError};
use crate::tools::registry::{Tool, ToolCategory, ToolContext};

/// Replays canned replies in order and records every history it was sent.
pub(crate) struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ModelMessage, ProviderError>>>,
    requests: Mutex<Vec<Vec<ModelMessage>>>,
}

impl ScriptedProvider {
    pub(crate) fn new(replies: Vec<ModelMessage>) -> Self {
        Self::from_results(replies.into_iter().map(Ok).collect())
    }

    pub(crate) fn from_results(replies: Vec<Result<ModelMessage, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<Vec<ModelMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        history: &[ModelMessage],
        _tools: &[AiTool],
    ) -> Result<ModelMessage, ProviderError> {
        self.requests.lock().push(history.to_vec());
        self.replies.lock().pop_front().unwrap_or_else(|| {
            Err(ProviderError::InvalidResponse(
                "script exhausted".to_string(),
            ))
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Never answers.
pub(crate) struct PendingProvider;

#[async_trait]
impl Provider for PendingProvider {
    async fn complete(
        &self,
        _history: &[ModelMessage],
        _tools: &[AiTool],
    ) -> Result<ModelMessage, ProviderError> {
        futures::future::pending().await
    }

    fn name(&self) -> &str {
        "pending"
    }
}

/// Records its inputs and answers with a fixed output (or a fixed failure).
pub(crate) struct RecordingTool {
    name: String,
    category: ToolCategory,
    fail: bool,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            category: ToolCategory::Write,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn read_only(name: &str) -> Self {
        Self {
            category: ToolCategory::ReadOnly,
            ..Self::new(name)
        }
    }

    pub(crate) fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub(crate) fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records its input"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn category(&self) -> ToolCategory {
        self.category
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        self.calls.lock().push(params);
        if self.fail {
            Err(ToolError::Failed(format!("{} failed", self.name)))
        } else {
            Ok(format!("{} ok", self.name))
        }
    }
}
