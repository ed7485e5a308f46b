//! List directory tool - breadth-first listing with depth/limit

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::fs;

use crate::error::ToolError;
use crate::tools::registry::{parse_params, Tool, ToolCategory, ToolContext};

const DEFAULT_DEPTH: usize = 2;
const DEFAULT_LIMIT: usize = 200;
const MAX_LIMIT: usize = 10_000;

pub struct ListTool;

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    depth: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ListTool {
    fn name(&self) -> &str {
        "list"
    }

    fn description(&self) -> &str {
        "List directory contents recursively, directories first. depth controls recursion (default 2), limit caps entries (default 200)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: working directory)"
                },
                "depth": {
                    "type": "number",
                    "description": "Maximum recursion depth (default: 2)"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of entries to return (default: 200)"
                }
            },
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_params(params)?;
        let max_depth = params.depth.unwrap_or(DEFAULT_DEPTH);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let requested = params.path.unwrap_or_else(|| ".".to_string());

        if !ctx.resolve_path(&requested).exists() {
            return Err(ToolError::Failed(format!(
                "Directory not found: {}",
                requested
            )));
        }
        let root = ctx.sandboxed_resolve(&requested)?;
        if !root.is_dir() {
            return Err(ToolError::Failed(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let mut listing: Vec<String> = Vec::new();
        let mut dir_count = 0;
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::from([(root.clone(), 0)]);

        while let Some((dir, depth)) = queue.pop_front() {
            if listing.len() >= limit {
                break;
            }
            let Ok(mut read_dir) = fs::read_dir(&dir).await else {
                continue;
            };

            let mut children: Vec<(String, PathBuf, bool)> = Vec::new();
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let is_dir = entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false);
                children.push((name, entry.path(), is_dir));
            }

            children.sort_by(|a, b| {
                b.2.cmp(&a.2)
                    .then_with(|| a.0.to_lowercase().cmp(&b.0.to_lowercase()))
            });

            for (_, entry_path, is_dir) in children {
                if listing.len() >= limit {
                    break;
                }
                let relative = entry_path
                    .strip_prefix(&root)
                    .unwrap_or(&entry_path)
                    .to_string_lossy()
                    .to_string();

                if is_dir {
                    dir_count += 1;
                    listing.push(format!("{}/", relative));
                    if depth < max_depth {
                        queue.push_back((entry_path, depth + 1));
                    }
                } else {
                    listing.push(relative);
                }
            }
        }

        let total = listing.len();
        Ok(json!({
            "output": listing.join("\n"),
            "total_entries": total,
            "directories": dir_count,
            "files": total - dir_count,
            "truncated": total >= limit
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_directories_first_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        std::fs::write(dir.path().join(".env"), "").unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "agent-a");

        let out = ListTool.execute(json!({}), &ctx).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        let listing = parsed["output"].as_str().unwrap();

        assert!(listing.starts_with("src/"));
        assert!(listing.contains("Cargo.toml"));
        assert!(!listing.contains(".env"));
        assert_eq!(parsed["directories"], 1);
    }
}
