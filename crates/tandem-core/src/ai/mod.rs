//! AI provider layer
//!
//! Message types exchanged with the model and the `Provider` boundary the
//! conversation controller drives.

pub mod anthropic;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use provider::Provider;
pub use types::{AiTool, Content, ModelMessage, Role};
