//! Tool registry and dispatcher
//!
//! Declares the capabilities the model may call and executes exactly one of
//! them per conversational turn. Every failure mode at the dispatch
//! boundary (unknown tool, bad arguments, timeout, collaborator error)
//! becomes a structured result the model can reason about in the next
//! round; nothing propagates as an error.

pub mod catalog;

use crate::config::{TOOL_RESULT_MAX_CHARS, TOOL_TIMEOUT_SECS};
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Structured outcome of a tool invocation
///
/// Always produced, success or failure: a failed tool must stay
/// interpretable by the model, not just logged.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    /// Whether the tool ran to completion
    pub success: bool,
    /// Result payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Machine-readable error code on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable explanation the model may relay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// What the model should do next
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

impl ToolCallResult {
    /// Successful result carrying a payload.
    #[must_use]
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            suggestion: None,
            next_step: None,
        }
    }

    /// Failed result with an error code and guidance for the model.
    #[must_use]
    pub fn failure(code: &str, suggestion: &str, next_step: &str) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(code.to_string()),
            suggestion: Some(suggestion.to_string()),
            next_step: Some(next_step.to_string()),
        }
    }

    /// Serializes the result for the model, capped with a truncation marker.
    #[must_use]
    pub fn render_for_model(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        if serialized.chars().count() <= TOOL_RESULT_MAX_CHARS {
            return serialized;
        }
        let truncated = crate::utils::truncate_graphemes(&serialized, TOOL_RESULT_MAX_CHARS);
        format!("{truncated}…[resultado truncado]")
    }
}

/// Executes one tool call
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with already-parsed JSON arguments.
    async fn call(&self, args: Value) -> ToolCallResult;
}

/// A registered tool: contract, limits, and handler
#[derive(Clone)]
pub struct ToolSpec {
    /// Name the model calls the tool by
    pub name: String,
    /// What the tool does, shown to the model
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
    /// Execution timeout
    pub timeout: Duration,
    /// Whether the authenticated sender is injected into the arguments
    pub inject_sender: bool,
    /// The implementation
    pub handler: Arc<dyn ToolHandler>,
}

/// Registry of callable tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool
    pub fn register(&mut self, spec: ToolSpec) {
        info!(tool = %spec.name, "Registered tool");
        self.tools.push(spec);
    }

    /// Tool declarations for the model request
    #[must_use]
    pub fn declarations(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect()
    }

    /// Executes a tool call on behalf of `sender`.
    ///
    /// `raw_args` is the model-supplied argument string. For tools that
    /// declare it, the sender identity is written into the arguments here,
    /// overriding anything the model put there: identity is never trusted
    /// from model output.
    pub async fn dispatch(&self, name: &str, raw_args: &str, sender: &str) -> ToolCallResult {
        let Some(tool) = self.tools.iter().find(|t| t.name == name) else {
            warn!(tool = name, "Unknown tool requested");
            return ToolCallResult::failure(
                "unknown_tool",
                "Esa herramienta no existe.",
                "Responde con la información que ya tienes o pide aclaración al cliente.",
            );
        };

        let parsed = if raw_args.trim().is_empty() {
            Ok(Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str::<Value>(raw_args)
        };
        let mut args = match parsed {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) | Err(_) => {
                warn!(tool = name, "Tool arguments were not a JSON object");
                return ToolCallResult::failure(
                    "invalid_arguments",
                    "Los argumentos no tienen el formato esperado.",
                    "Vuelve a llamar la herramienta con un objeto JSON válido.",
                );
            }
        };

        if tool.inject_sender {
            if let Some(map) = args.as_object_mut() {
                map.insert("phone".to_string(), Value::String(sender.to_string()));
            }
        }

        debug!(
            tool = name,
            args = %crate::utils::truncate_graphemes(&args.to_string(), 200),
            "Executing tool call"
        );

        match timeout(tool.timeout, tool.handler.call(args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    tool = name,
                    timeout_secs = tool.timeout.as_secs(),
                    "Tool execution timed out"
                );
                ToolCallResult::failure(
                    "timeout",
                    "La operación tardó demasiado.",
                    "Dile al cliente que lo intente de nuevo en unos momentos.",
                )
            }
        }
    }
}

/// Default per-tool timeout.
#[must_use]
pub fn default_tool_timeout() -> Duration {
    Duration::from_secs(TOOL_TIMEOUT_SECS)
}
