//! Edit tool - exact text replacement

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::error::ToolError;
use crate::tools::registry::{parse_params, Tool, ToolContext};

pub struct EditTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace text in a file. old_string must match exactly once unless replace_all is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "The text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The text to replace it with"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)",
                    "default": false
                }
            },
            "required": ["file_path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_params(params)?;
        if params.old_string.is_empty() {
            return Err(ToolError::InvalidParameters(
                "old_string must not be empty".to_string(),
            ));
        }

        if !ctx.resolve_path(&params.file_path).exists() {
            return Err(ToolError::Failed(format!(
                "File not found: {}",
                params.file_path
            )));
        }
        let path = ctx.sandboxed_resolve(&params.file_path)?;
        let content = fs::read_to_string(&path).await?;

        let count = content.matches(&params.old_string).count();
        if count == 0 {
            return Err(ToolError::Failed(format!(
                "String not found in file: {:?}",
                params.old_string
            )));
        }
        if count > 1 && !params.replace_all {
            return Err(ToolError::Failed(format!(
                "String found {} times. Use replace_all=true or provide more context to make it unique.",
                count
            )));
        }

        let new_content = if params.replace_all {
            content.replace(&params.old_string, &params.new_string)
        } else {
            content.replacen(&params.old_string, &params.new_string, 1)
        };
        fs::write(&path, &new_content).await?;

        Ok(json!({
            "message": format!("Replaced {} occurrence(s)", count),
            "replacements": count,
            "file_path": path.display().to_string()
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ambiguous_match_is_rejected_without_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.rs");
        std::fs::write(&file, "foo\nfoo\n").unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "agent-a");

        let err = EditTool
            .execute(
                json!({"file_path": "lib.rs", "old_string": "foo", "new_string": "bar"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 times"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "foo\nfoo\n");

        EditTool
            .execute(
                json!({"file_path": "lib.rs", "old_string": "foo", "new_string": "bar", "replace_all": true}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "bar\nbar\n");
    }
}
