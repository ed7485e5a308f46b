//! Anthropic Messages API provider
//!
//! Non-streaming. Tool results travel as `user` messages, and consecutive
//! same-role messages are merged because the API wants strict alternation.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::provider::Provider;
use super::types::{AiTool, Content, ModelMessage, Role};
use crate::error::ProviderError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: usize,
    system_prompt: Option<String>,
    api_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
            system_prompt: None,
            api_url: API_URL.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Point at a compatible endpoint (proxies, local gateways).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn build_body(&self, history: &[ModelMessage], tools: &[AiTool]) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": convert_messages(history),
        });

        if let Some(system) = &self.system_prompt {
            body["system"] = Value::String(system.clone());
        }

        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect(),
            );
        }

        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        history: &[ModelMessage],
        tools: &[AiTool],
    ) -> Result<ModelMessage, ProviderError> {
        let body = self.build_body(history, tools);
        debug!(
            model = %self.model,
            messages = history.len(),
            tools = tools.len(),
            "Sending Anthropic request"
        );

        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = response.json().await?;
        parse_response(&json)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

fn convert_messages(messages: &[ModelMessage]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();
    let mut last_role: Option<&str> = None;

    for msg in messages {
        let role = match msg.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
        };
        let blocks: Vec<Value> = msg.content.iter().map(convert_content).collect();

        if last_role == Some(role) {
            if let Some(Value::Array(existing)) =
                result.last_mut().and_then(|m| m.get_mut("content"))
            {
                existing.extend(blocks);
                continue;
            }
        }

        result.push(json!({ "role": role, "content": blocks }));
        last_role = Some(role);
    }

    result
}

fn convert_content(content: &Content) -> Value {
    match content {
        Content::Text { text } => json!({ "type": "text", "text": text }),
        Content::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        Content::ToolResult {
            tool_use_id,
            output,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": output,
            "is_error": is_error,
        }),
    }
}

fn parse_response(json: &Value) -> Result<ModelMessage, ProviderError> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing content array".to_string()))?;

    let mut content = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                let text = block.get("text").and_then(|t| t.as_str()).unwrap_or("");
                if !text.is_empty() {
                    content.push(Content::text(text));
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(|v| v.as_str());
                let name = block.get("name").and_then(|v| v.as_str());
                let (Some(id), Some(name)) = (id, name) else {
                    return Err(ProviderError::InvalidResponse(
                        "tool_use block without id or name".to_string(),
                    ));
                };
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                content.push(Content::tool_use(id, name, input));
            }
            // thinking and server-side blocks are not part of the loop's model
            _ => {}
        }
    }

    Ok(ModelMessage::assistant(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_merge_into_following_user_text() {
        let history = vec![
            ModelMessage::user("read it"),
            ModelMessage::assistant(vec![Content::tool_use("t1", "read", json!({}))]),
            ModelMessage::tool_results(vec![Content::tool_result("t1", "body", false)]),
            ModelMessage::user("and now?"),
        ];

        let converted = convert_messages(&history);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[2]["role"], "user");
        assert_eq!(converted[2]["content"][0]["type"], "tool_result");
        assert_eq!(converted[2]["content"][1]["text"], "and now?");
    }

    #[test]
    fn parse_response_keeps_text_and_tool_use_order() {
        let json = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_9", "name": "read", "input": {"file_path": "x"}}
            ]
        });

        let msg = parse_response(&json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content.len(), 2);
        assert_eq!(msg.tool_calls()[0].id, "toolu_9");
    }

    #[test]
    fn parse_response_rejects_missing_content() {
        let err = parse_response(&json!({"type": "error"})).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn body_includes_tools_and_system() {
        let provider = AnthropicProvider::new("key", "model-x", 1024).with_system_prompt("be brief");
        let tools = vec![AiTool {
            name: "read".to_string(),
            description: "Read a file".to_string(),
            input_schema: json!({"type": "object"}),
        }];

        let body = provider.build_body(&[ModelMessage::user("hi")], &tools);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["tools"][0]["name"], "read");
        assert_eq!(body["max_tokens"], 1024);
    }
}
