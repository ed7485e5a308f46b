//! The provider boundary
//!
//! The controller only needs request/response semantics: full history and
//! tool definitions in, one assistant message out. Transport, auth and
//! retries belong to the implementation.

use async_trait::async_trait;

use super::types::{AiTool, ModelMessage};
use crate::error::ProviderError;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Request one completion. The returned message must have the
    /// `Assistant` role; its content is decomposed into text and tool-use
    /// blocks by the caller.
    async fn complete(
        &self,
        history: &[ModelMessage],
        tools: &[AiTool],
    ) -> Result<ModelMessage, ProviderError>;

    /// Provider name for logging and display.
    fn name(&self) -> &str;
}
