// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::Serialize;
use serde_json::Value;

use faber_tools::Task;

/// One diff entry in a [`StreamChunk::Diff`].
#[derive(Debug, Clone, Serialize)]
pub struct FileDiff {
    pub path: String,
    pub diff: String,
}

/// Typed chunks emitted over a turn's stream.
///
/// The HTTP transport serializes each as an SSE `data:` JSON object; the
/// `type` tag and snake_case field names are the wire contract.  Within one
/// turn, chunks are linearly ordered: a tool call's start chunk precedes any
/// of its `command_output` chunks, which precede its end chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Content {
        content: String,
    },
    IterationStatus {
        iteration: u32,
        max_iterations: u32,
        phase: String,
    },
    ToolCall {
        tool_name: String,
        tool_call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_args: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_result: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_status: Option<String>,
    },
    CommandOutput {
        tool_call_id: String,
        content: String,
    },
    Plan {
        content: String,
    },
    PlanChunk {
        content: String,
    },
    Diff {
        diffs: Vec<FileDiff>,
    },
    Review {
        content: String,
    },
    Tasks {
        tasks: Vec<Task>,
    },
    AutoStart {
        port: u16,
    },
    AutoStartError {
        content: String,
    },
    Error {
        content: String,
    },
    Done,
}

impl StreamChunk {
    /// Start-of-call chunk carrying the arguments.
    pub fn tool_call_start(name: &str, id: &str, args: &Value) -> Self {
        StreamChunk::ToolCall {
            tool_name: name.to_string(),
            tool_call_id: id.to_string(),
            tool_args: Some(args.clone()),
            content: Some(format!("Calling {name}")),
            tool_result: None,
            tool_status: None,
        }
    }

    /// End-of-call chunk carrying status and result.
    pub fn tool_call_end(name: &str, id: &str, result: &str, success: bool) -> Self {
        StreamChunk::ToolCall {
            tool_name: name.to_string(),
            tool_call_id: id.to_string(),
            tool_args: None,
            content: None,
            tool_result: Some(result.to_string()),
            tool_status: Some(if success { "success" } else { "error" }.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
