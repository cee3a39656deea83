// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{CompletionRequest, ModelProvider, ResponseEvent, ResponseStream, Role};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::FinishReason("stop".into())),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider.  Each call to `complete` pops the next
/// response script from the front of the queue.  This lets tests specify
/// exact event sequences — including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each `complete()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Count of `complete()` calls made so far.
    pub calls: Arc<Mutex<u32>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of response scripts.
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// sequence of [`ResponseEvent`]s emitted for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            ResponseEvent::TextDelta(reply.into()),
            ResponseEvent::FinishReason("stop".into()),
            ResponseEvent::Done,
        ]])
    }

    /// Convenience: provider that returns a tool call, then a text reply on
    /// the following round.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::ToolCallDelta {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                ResponseEvent::FinishReason("tool_calls".into()),
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta(final_text.into()),
                ResponseEvent::FinishReason("stop".into()),
                ResponseEvent::Done,
            ],
        ])
    }

    /// Script helper: one round that emits a single complete tool call.
    pub fn tool_call_round(
        id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: id.into(),
                name: name.into(),
                arguments: args_json.into(),
            },
            ResponseEvent::FinishReason("tool_calls".into()),
            ResponseEvent::Done,
        ]
    }

    /// Script helper: one round that emits a plain text reply.
    pub fn text_round(text: impl Into<String>) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(text.into()),
            ResponseEvent::FinishReason("stop".into()),
            ResponseEvent::Done,
        ]
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn model_name(&self) -> &str {
        "scripted-mock"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().unwrap() = Some(req);
        *self.calls.lock().unwrap() += 1;

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Out of scripts: behave like a model that has nothing more
                // to say so loops terminate instead of erroring.
                vec![
                    ResponseEvent::TextDelta("Done.".into()),
                    ResponseEvent::FinishReason("stop".into()),
                    ResponseEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };

        let events: Vec<anyhow::Result<ResponseEvent>> =
            script.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A provider that always fails with the given message.  Used to test the
/// retry and classification paths.
pub struct FailingProvider {
    pub message: String,
    /// After this many failures, fall back to a text reply.  `None` fails
    /// forever.
    pub succeed_after: Option<u32>,
    pub calls: Arc<Mutex<u32>>,
}

impl FailingProvider {
    pub fn new(message: impl Into<String>, succeed_after: Option<u32>) -> Self {
        Self {
            message: message.into(),
            succeed_after,
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl ModelProvider for FailingProvider {
    fn model_name(&self) -> &str {
        "failing-mock"
    }

    async fn complete(&self, _req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if let Some(after) = self.succeed_after {
            if n > after {
                let events: Vec<anyhow::Result<ResponseEvent>> = vec![
                    Ok(ResponseEvent::TextDelta("Recovered.".into())),
                    Ok(ResponseEvent::FinishReason("stop".into())),
                    Ok(ResponseEvent::Done),
                ];
                return Ok(Box::pin(stream::iter(events)));
            }
        }
        anyhow::bail!("{}", self.message)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
