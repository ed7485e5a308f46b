//! Read tool - Read file contents

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::error::ToolError;
use crate::tools::registry::{parse_params, Tool, ToolCategory, ToolContext};

const DEFAULT_LINE_LIMIT: usize = 2000;

pub struct ReadTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read file contents. Supports a 1-indexed line offset and a line limit for large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory"
                },
                "offset": {
                    "type": "number",
                    "description": "The line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "number",
                    "description": "The number of lines to read"
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_params(params)?;

        if !ctx.resolve_path(&params.file_path).exists() {
            return Err(ToolError::Failed(format!(
                "File not found: {}",
                params.file_path
            )));
        }
        let path = ctx.sandboxed_resolve(&params.file_path)?;
        if !path.is_file() {
            return Err(ToolError::Failed(format!(
                "Path is not a file: {}",
                path.display()
            )));
        }

        let bytes = fs::read(&path).await?;
        let check_len = bytes.len().min(8192);
        if bytes[..check_len].contains(&0) {
            return Ok(json!({
                "content": format!("Binary file: {} ({} bytes)", path.display(), bytes.len()),
                "total_lines": 0,
                "lines_returned": 0
            })
            .to_string());
        }

        let content = String::from_utf8(bytes)
            .map_err(|e| ToolError::Failed(format!("File is not valid UTF-8: {}", e)))?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let start = params.offset.unwrap_or(1).saturating_sub(1);
        let end = (start + params.limit.unwrap_or(DEFAULT_LINE_LIMIT)).min(total_lines);

        if total_lines == 0 {
            return Ok(json!({"content": "", "total_lines": 0, "lines_returned": 0}).to_string());
        }
        if start >= total_lines {
            return Err(ToolError::InvalidParameters(format!(
                "Start line {} is beyond file length ({})",
                start + 1,
                total_lines
            )));
        }

        Ok(json!({
            "content": lines[start..end].join("\n"),
            "total_lines": total_lines,
            "lines_returned": end - start,
            "start_line": start + 1
        })
        .to_string())
    }
}
