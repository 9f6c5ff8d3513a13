//! OpenAI-compatible chat provider.
//!
//! Talks to the chat completions endpoint directly over HTTP with lenient
//! response structs: some compatible backends omit the `type` field on tool
//! calls, which strict client libraries reject.

use super::{ChatModel, ChatResponse, LlmError, Message, ToolCall, ToolCallFunction, ToolDefinition};
use crate::config::{Settings, LLM_HTTP_TIMEOUT_SECS, MODEL_MAX_TOKENS, MODEL_TEMPERATURE};
use reqwest::Client as HttpClient;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(serde::Deserialize, Debug)]
struct LenientToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(serde::Deserialize, Debug)]
struct LenientToolCall {
    id: Option<String>,
    function: LenientToolCallFunction,
}

#[derive(serde::Deserialize, Debug)]
struct LenientMessage {
    content: Option<String>,
    tool_calls: Option<Vec<LenientToolCall>>,
}

#[derive(serde::Deserialize, Debug)]
struct LenientChoice {
    message: LenientMessage,
    finish_reason: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
struct LenientResponse {
    choices: Vec<LenientChoice>,
}

/// Chat provider backed by an OpenAI-compatible API
pub struct OpenAiChat {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    /// Create a new provider from settings
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(LLM_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            http_client,
            api_key: settings.openai_api_key.clone(),
            base_url: settings
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: settings.openai_model.clone(),
        }
    }

    fn prepare_messages(system_prompt: &str, history: &[Message]) -> Vec<serde_json::Value> {
        let mut messages = vec![json!({
            "role": "system",
            "content": system_prompt
        })];

        for msg in history {
            match msg.role.as_str() {
                "tool" => {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": msg.tool_call_id,
                        "content": msg.content
                    }));
                }
                "assistant" => {
                    let mut m = json!({
                        "role": "assistant",
                        "content": msg.content
                    });

                    if let Some(tool_calls) = &msg.tool_calls {
                        let api_tool_calls: Vec<serde_json::Value> = tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.function.name,
                                        "arguments": tc.function.arguments
                                    }
                                })
                            })
                            .collect();

                        m["tool_calls"] = json!(api_tool_calls);
                    }

                    messages.push(m);
                }
                _ => {
                    messages.push(json!({
                        "role": msg.role,
                        "content": msg.content
                    }));
                }
            }
        }
        messages
    }

    fn parse_response(res_json: &LenientResponse) -> Result<ChatResponse, LlmError> {
        let choice = res_json
            .choices
            .first()
            .ok_or_else(|| LlmError::ApiError("Empty response".to_string()))?;

        let content = choice.message.content.clone();
        let finish_reason = choice
            .finish_reason
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        let tool_calls = choice
            .message
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCall {
                        id: tc
                            .id
                            .clone()
                            .unwrap_or_else(|| uuid::Uuid::new_v4().as_simple().to_string()),
                        function: ToolCallFunction {
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
        })
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiChat {
    async fn chat_with_tools(
        &self,
        system_prompt: &str,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let messages = Self::prepare_messages(system_prompt, history);

        let openai_tools: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "response_format": { "type": "json_object" },
            "max_tokens": MODEL_MAX_TOKENS,
            "temperature": MODEL_TEMPERATURE
        });
        if !openai_tools.is_empty() {
            body["tools"] = json!(openai_tools);
        }

        debug!(model = %self.model, rounds = history.len(), "Sending chat request");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let wait_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimit { wait_secs, message });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let truncated = crate::utils::truncate_graphemes(&error_text, 500);
            return Err(LlmError::ApiError(format!(
                "API error: {status} - {truncated}"
            )));
        }

        let res_json: LenientResponse = response
            .json()
            .await
            .map_err(|e| LlmError::JsonError(e.to_string()))?;

        Self::parse_response(&res_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_fixture(raw: &str) -> Result<ChatResponse, LlmError> {
        let parsed: LenientResponse =
            serde_json::from_str(raw).map_err(|e| LlmError::JsonError(e.to_string()))?;
        OpenAiChat::parse_response(&parsed)
    }

    #[test]
    fn parses_plain_content() {
        let raw = r#"{"choices":[{"message":{"content":"{\"type\":\"text\"}"},"finish_reason":"stop"}]}"#;
        let Ok(resp) = parse_fixture(raw) else {
            panic!("expected parse to succeed");
        };
        assert_eq!(resp.content.as_deref(), Some("{\"type\":\"text\"}"));
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.finish_reason, "stop");
    }

    #[test]
    fn parses_tool_call_without_type_field() {
        let raw = r#"{"choices":[{"message":{"content":null,"tool_calls":[{"id":"call_1","function":{"name":"get_menu","arguments":"{}"}}]},"finish_reason":"tool_calls"}]}"#;
        let Ok(resp) = parse_fixture(raw) else {
            panic!("expected parse to succeed");
        };
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.name, "get_menu");
    }

    #[test]
    fn generates_id_when_missing() {
        let raw = r#"{"choices":[{"message":{"tool_calls":[{"function":{"name":"get_menu","arguments":"{}"}}]},"finish_reason":"tool_calls"}]}"#;
        let Ok(resp) = parse_fixture(raw) else {
            panic!("expected parse to succeed");
        };
        assert!(!resp.tool_calls[0].id.is_empty());
    }

    #[test]
    fn rejects_empty_choices() {
        let raw = r#"{"choices":[]}"#;
        assert!(parse_fixture(raw).is_err());
    }
}
