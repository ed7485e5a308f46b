//! Write tool - Create or overwrite files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tracing::info;

use crate::error::ToolError;
use crate::tools::registry::{parse_params, Tool, ToolContext};

pub struct WriteTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite files. Creates parent directories if needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_params(params)?;
        let path = ctx.sandboxed_resolve_new_path(&params.file_path)?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            info!(dir = %parent.display(), "Write tool: creating parent directory");
            fs::create_dir_all(parent).await?;
        }

        fs::write(&path, &params.content).await?;
        info!(agent_id = %ctx.agent_id, path = %path.display(), "Wrote file");

        Ok(json!({
            "message": format!("Successfully wrote {} lines", params.content.lines().count()),
            "bytes_written": params.content.len(),
            "file_path": path.display().to_string()
        })
        .to_string())
    }
}
