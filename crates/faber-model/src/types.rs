// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation history sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageContent {
    Text(String),
    /// An assistant-emitted tool invocation.  Stored one call per message
    /// internally; consecutive calls are coalesced into a single wire-format
    /// assistant message on serialization.
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    /// The result of a tool invocation, echoed back to the model.
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON arguments string as the wire format carries it.
    pub arguments: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: &Value) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: args.to_string(),
                },
            },
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
            },
        }
    }

    /// Plain-text view of the message; `None` for tool-call entries.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::ToolResult { content, .. } => Some(content),
            MessageContent::ToolCall { .. } => None,
        }
    }

    /// Rough token estimate (chars / 4) used for history windowing decisions.
    pub fn approx_tokens(&self) -> usize {
        let chars = match &self.content {
            MessageContent::Text(t) => t.len(),
            MessageContent::ToolResult { content, .. } => content.len(),
            MessageContent::ToolCall { function, .. } => {
                function.name.len() + function.arguments.len()
            }
        };
        chars / 4
    }
}

// ─── Request / response types ─────────────────────────────────────────────────

/// JSON-schema description of one tool, serialized into the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model id; empty lets the endpoint pick its loaded model.
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// A fully accumulated tool call, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// One demultiplexed event from the completion stream.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A raw content delta (pre think-stripping).
    TextDelta(String),
    /// A fragmented tool-call delta.  `index` routes accumulation when the
    /// model emits several parallel calls; `id`/`name` arrive on the first
    /// fragment, `arguments` accumulates across fragments.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Terminal finish reason from the provider (`stop`, `tool_calls`, …).
    FinishReason(String),
    /// `data: [DONE]` sentinel.
    Done,
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// The streaming model endpoint, abstracted so tests can substitute a
/// scripted provider.  The engine uses exactly one production
/// implementation, [`crate::OpenAiCompatClient`].
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::tool_result("1", "r").role, Role::Tool);
    }

    #[test]
    fn as_text_for_tool_call_is_none() {
        let m = Message::tool_call("1", "read_file", &json!({"path": "a.txt"}));
        assert!(m.as_text().is_none());
    }

    #[test]
    fn as_text_for_tool_result_is_content() {
        let m = Message::tool_result("1", "hello");
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn approx_tokens_is_quarter_of_chars() {
        let m = Message::user("12345678");
        assert_eq!(m.approx_tokens(), 2);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
