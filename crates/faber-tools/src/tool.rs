// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// Tools never propagate exceptions: every failure becomes
/// `{success: false, result}` so the text can be echoed verbatim into the
/// model's tool-result message and the model can self-correct.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub success: bool,
    /// Human-readable result text.
    pub result: String,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            result: result.into(),
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            result: msg.into(),
        }
    }
}

/// Per-tool-call streaming output callback: `(tool_call_id, chunk)`.
/// Used by `execute_command` so the UI can tail long-running commands.
pub type CommandOutputFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Read-only view of the project supervisor, injected so informational
/// tools (`read_logs`, `take_screenshot`) can query runtime state without
/// the tools crate owning the supervisor.
#[async_trait]
pub trait ProjectRuntime: Send + Sync {
    async fn tail_logs(&self, project_dir: &Path, lines: usize) -> Vec<String>;
    async fn project_status(&self, project_dir: &Path) -> Option<RuntimeStatus>;
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub status: String,
    pub port: Option<u16>,
}

/// Everything a tool needs about the turn it runs in.
#[derive(Clone)]
pub struct ToolContext {
    /// The project directory all relative paths resolve against.
    pub working_dir: PathBuf,
    /// When true, resolved paths must stay under `working_dir`.
    pub sandboxed: bool,
    /// Supervisor view for informational tools; `None` in contexts without
    /// a running project (e.g. unit tests).
    pub runtime: Option<Arc<dyn ProjectRuntime>>,
    /// Streaming callback for command output, when the subscriber wants it.
    pub on_command_output: Option<CommandOutputFn>,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            sandboxed: true,
            runtime: None,
            on_command_output: None,
        }
    }

    pub fn emit_command_output(&self, call_id: &str, chunk: &str) {
        if let Some(cb) = &self.on_command_output {
            cb(call_id, chunk);
        }
    }
}

/// Trait that every builtin tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters — serialized to the model and used to
    /// validate inputs, so the model and the executor agree.
    fn parameters_schema(&self) -> Value;
    /// Read-only tools stay available in plan mode.
    fn read_only(&self) -> bool {
        false
    }
    /// Execute the tool.  Errors must be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
