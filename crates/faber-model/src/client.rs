// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming client for OpenAI-compatible `/v1/chat/completions` endpoints.
//!
//! Parses server-sent-event frames (`data: <json>` lines, terminated by
//! `data: [DONE]`).  SSE events can be split across TCP packets, so a line
//! buffer is maintained across chunks and events are emitted only for
//! complete lines.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    CompletionRequest, Message, MessageContent, ModelProvider, ResponseEvent, ResponseStream, Role,
};

/// Wall-clock ceiling for one whole completion stream.
const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat completion client.
pub struct OpenAiCompatClient {
    /// API base that ends before `/chat/completions`, e.g.
    /// `http://localhost:1234/v1`.
    chat_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, model: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            chat_url: format!("{base}/chat/completions"),
            model: model.into(),
            max_tokens,
            temperature,
            // The reqwest timeout covers the entire response, body included,
            // which is exactly the whole-stream deadline we want.
            client: reqwest::Client::builder()
                .timeout(STREAM_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Same endpoint, different sampling — used for the low-temperature
    /// review pass and the Planner/Coder role split.
    pub fn with_model(&self, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            chat_url: self.chat_url.clone(),
            model: model.into(),
            max_tokens: self.max_tokens,
            temperature,
            client: self.client.clone(),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_wire_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let max_tokens = if req.max_tokens > 0 {
            req.max_tokens
        } else {
            self.max_tokens
        };
        let mut body = json!({
            "messages": messages,
            "stream": req.stream,
            "max_tokens": max_tokens,
            "temperature": req.temperature,
        });
        let model = if req.model.is_empty() { &self.model } else { &req.model };
        if !model.is_empty() {
            body["model"] = json!(model);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        debug!(
            model = %model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let resp = self
            .client
            .post(&self.chat_url)
            .json(&body)
            .send()
            .await
            .context("model endpoint request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("endpoint error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across multiple TCP packets.  Maintain a
        // line buffer across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Connectivity probe: `GET /v1/models`, returning available model ids.
pub async fn probe_models(base_url: &str) -> anyhow::Result<Vec<String>> {
    let base = base_url.trim_end_matches('/');
    let url = format!("{base}/models");
    let resp = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?
        .get(&url)
        .send()
        .await
        .context("model endpoint unreachable")?;
    if !resp.status().is_success() {
        bail!("endpoint error {}: {}", resp.status(), url);
    }
    let body: Value = resp.json().await.context("invalid /models response")?;
    let ids = body["data"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Ok(ids)
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v)
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line (bytes not yet terminated by `\n`) is left
/// in `buf` so it can be extended by the next TCP chunk.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        // Strip the optional Windows-style \r before \n.
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        // Advance buffer past the consumed line including the \n.
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

fn parse_sse_chunk(v: &Value) -> Option<anyhow::Result<ResponseEvent>> {
    let choice = &v["choices"][0];

    if let Some(reason) = choice["finish_reason"].as_str() {
        return Some(Ok(ResponseEvent::FinishReason(reason.to_string())));
    }

    let delta = &choice["delta"];

    // Tool call delta — each SSE chunk carries one tool-call fragment in
    // practice; the index routes accumulation in the collector.
    if let Some(tool_calls) = delta.get("tool_calls") {
        if let Some(tc) = tool_calls.get(0) {
            let index = tc["index"].as_u64().unwrap_or(0) as u32;
            let id = tc["id"].as_str().unwrap_or("").to_string();
            let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
            let args = tc["function"]["arguments"].as_str().unwrap_or("").to_string();
            return Some(Ok(ResponseEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments: args,
            }));
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return Some(Ok(ResponseEvent::TextDelta(text.to_string())));
        }
    }

    None
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert internal [`Message`]s into the OpenAI wire-format JSON array.
///
/// **Parallel tool call coalescing**: the wire format requires all tool calls
/// from one assistant turn inside a *single* assistant message as a
/// `tool_calls` array.  Internally each call is a separate message (easier to
/// work with), so consecutive `ToolCall` entries are merged here.
pub(crate) fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    fn tool_call_to_json(tool_call_id: &str, function: &crate::FunctionCall) -> Value {
        json!({
            "id": tool_call_id,
            "type": "function",
            "function": {
                "name": function.name,
                "arguments": function.arguments,
            }
        })
    }

    let mut result: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];

        if let MessageContent::ToolCall {
            tool_call_id,
            function,
        } = &m.content
        {
            let mut calls = vec![tool_call_to_json(tool_call_id, function)];
            i += 1;
            while i < messages.len() {
                if let MessageContent::ToolCall {
                    tool_call_id,
                    function,
                } = &messages[i].content
                {
                    calls.push(tool_call_to_json(tool_call_id, function));
                    i += 1;
                } else {
                    break;
                }
            }
            result.push(json!({ "role": "assistant", "tool_calls": calls }));
            continue;
        }

        let v = match &m.content {
            MessageContent::Text(t) => json!({
                "role": role_str(&m.role),
                "content": t,
            }),
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
            MessageContent::ToolCall { .. } => unreachable!("handled above"),
        };
        result.push(v);
        i += 1;
    }

    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
