//! Tandem core library
//!
//! Everything the agent runtime needs outside of presentation:
//! - `agent` - the conversation controller, tool dispatch, approval gating
//! - `ai` - provider boundary and message types
//! - `tools` - tool trait, registry, built-in tools
//! - `coordination` - peer status records over shared files or mDNS
//! - `config` / `paths` - configuration loading and well-known locations

pub mod agent;
pub mod ai;
pub mod config;
pub mod coordination;
pub mod error;
pub mod paths;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use config::TandemConfig;
pub use error::{AgentError, CoordinationError, ProviderError, ToolError};
