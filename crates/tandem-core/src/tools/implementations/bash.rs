//! Bash tool - run a shell command in the working directory

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::ToolError;
use crate::tools::registry::{parse_params, Tool, ToolContext};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

pub struct BashTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    description: Option<String>,
}

fn build_shell_command(command: &str, ctx: &ToolContext) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.env("NO_COLOR", "1");
    cmd.env("TANDEM_AGENT_ID", &ctx.agent_id);
    cmd.current_dir(&ctx.working_dir);
    cmd.kill_on_drop(true);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory and return its combined output and exit code."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in milliseconds (max 600000)"
                },
                "description": {
                    "type": "string",
                    "description": "Short description of what this command does"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_params(params)?;

        match &params.description {
            Some(desc) => {
                tracing::info!(command = %params.command, description = %desc, "Executing bash command")
            }
            None => tracing::info!(command = %params.command, "Executing bash command"),
        }

        if let Some(sandbox) = &ctx.sandbox_root {
            let inside = ctx
                .working_dir
                .canonicalize()
                .ok()
                .zip(sandbox.canonicalize().ok())
                .is_some_and(|(wd, root)| wd.starts_with(root));
            if !inside {
                return Err(ToolError::AccessDenied(
                    "working directory is outside workspace".to_string(),
                ));
            }
        }

        let timeout_duration =
            Duration::from_millis(params.timeout.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS));

        let child = build_shell_command(&params.command, ctx)
            .spawn()
            .map_err(|e| ToolError::Failed(format!("Failed to spawn command: {}", e)))?;

        // kill_on_drop reaps the child when the timeout drops the future
        let output = timeout(timeout_duration, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout(timeout_duration))??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == 0 {
            Ok(json!({ "output": combined, "exit_code": exit_code }).to_string())
        } else {
            Err(ToolError::Failed(format!(
                "Command exited with code {}\n{}",
                exit_code, combined
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "agent-a");

        let out = BashTool
            .execute(json!({"command": "echo hello"}), &ctx)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["output"], "hello\n");
        assert_eq!(parsed["exit_code"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "agent-a");

        let err = BashTool
            .execute(json!({"command": "echo oops >&2; exit 3"}), &ctx)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("code 3"));
        assert!(message.contains("oops"));
    }

    #[tokio::test]
    async fn command_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "agent-a");

        let err = BashTool
            .execute(json!({"command": "sleep 5", "timeout": 50}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }
}
