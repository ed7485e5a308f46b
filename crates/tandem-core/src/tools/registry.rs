//! Tool registry and the `Tool` trait
//!
//! The registry is filled once at startup and shared behind an `Arc`; there is
//! no way to add or remove tools through a shared reference. Execution goes
//! through `ToolRegistry::execute`, which applies the per-call timeout and
//! runs post-execution hooks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agent::hooks::PostToolHook;
use crate::ai::types::AiTool;
use crate::error::ToolError;

/// Tool category for permission checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Never modifies files, processes or peers.
    ReadOnly,
    /// Modifies files, runs commands or publishes state.
    Write,
}

/// Permission mode for tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Write tools wait for an operator decision.
    #[default]
    Supervised,
    Autonomous,
}

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the JSON error envelope handed back to the model.
pub fn error_envelope(code: &str, message: impl std::fmt::Display) -> String {
    serde_json::json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message.to_string(),
        }
    })
    .to_string()
}

/// Parse tool parameters into a typed struct.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params).map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

/// Context for tool execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    /// If set, file tools refuse paths that resolve outside this directory.
    pub sandbox_root: Option<PathBuf>,
    /// Identity of the agent on whose behalf the tool runs.
    pub agent_id: String,
    /// Optional per-call timeout override
    pub timeout: Option<Duration>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            sandbox_root: None,
            agent_id: String::new(),
            timeout: None,
        }
    }
}

impl ToolContext {
    pub fn new(working_dir: PathBuf, agent_id: impl Into<String>) -> Self {
        Self {
            working_dir,
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn with_sandbox(mut self, sandbox_root: PathBuf) -> Self {
        self.sandbox_root = Some(sandbox_root);
        self
    }

    /// Resolve a path relative to working directory (absolute paths pass through)
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }

    /// Resolve an existing path, enforcing the sandbox if one is set.
    pub fn sandboxed_resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolve_path(path);

        let Some(sandbox) = &self.sandbox_root else {
            return Ok(resolved);
        };

        let canonical = resolved.canonicalize()?;
        if !canonical.starts_with(canonical_root(sandbox)) {
            return Err(ToolError::AccessDenied(format!(
                "path '{}' is outside workspace",
                path
            )));
        }
        Ok(canonical)
    }

    /// Resolve a path that may not exist yet, enforcing the sandbox.
    ///
    /// Traversal components are rejected outright; the nearest existing
    /// ancestor must canonicalize to somewhere inside the sandbox.
    pub fn sandboxed_resolve_new_path(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolve_path(path);

        let Some(sandbox) = &self.sandbox_root else {
            return Ok(resolved);
        };
        let sandbox = canonical_root(sandbox);

        if resolved
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ToolError::AccessDenied(
                "path traversal (..) not allowed".to_string(),
            ));
        }

        let mut base = resolved.clone();
        let mut suffix = Vec::new();
        while !base.exists() {
            match base.file_name() {
                Some(name) => suffix.push(name.to_owned()),
                None => break,
            }
            if !base.pop() {
                break;
            }
        }

        let mut final_path = if base.as_os_str().is_empty() || !base.exists() {
            sandbox.clone()
        } else {
            base.canonicalize()?
        };

        if !final_path.starts_with(&sandbox) {
            return Err(ToolError::AccessDenied(format!(
                "path '{}' is outside workspace",
                path
            )));
        }

        for name in suffix.into_iter().rev() {
            final_path.push(name);
        }
        Ok(final_path)
    }
}

fn canonical_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Tools are treated as writes unless they say otherwise.
    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Registry of tools, addressed by name, with definitions kept in
/// registration order.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
    default_timeout: Duration,
    post_hooks: Vec<Arc<dyn PostToolHook>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            post_hooks: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. A tool with the same name replaces the earlier one
    /// in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.by_name.get(&name) {
            Some(&idx) => {
                tracing::warn!(tool = %name, "Replacing previously registered tool");
                self.tools[idx] = tool;
            }
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn add_post_hook(&mut self, hook: Arc<dyn PostToolHook>) {
        self.post_hooks.push(hook);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).map(|&idx| self.tools[idx].clone())
    }

    pub fn category(&self, name: &str) -> Option<ToolCategory> {
        self.get(name).map(|t| t.category())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions advertised to the provider
    pub fn definitions(&self) -> Vec<AiTool> {
        self.tools
            .iter()
            .map(|t| AiTool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }

    /// Execute a tool by name with timeout and hooks.
    ///
    /// Returns `None` when no tool has that name.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Option<Result<String, ToolError>> {
        let tool = self.get(name)?;
        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        tracing::debug!(tool = name, agent_id = %ctx.agent_id, "Executing tool");

        let result = match tokio::time::timeout(timeout, tool.execute(params.clone(), ctx)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    tool = name,
                    timeout_secs = timeout.as_secs(),
                    "Tool execution timed out"
                );
                Err(ToolError::Timeout(timeout))
            }
        };

        let duration = start.elapsed();
        for hook in &self.post_hooks {
            hook.after_execute(name, &params, &result, duration).await;
        }

        Some(result)
    }
}
