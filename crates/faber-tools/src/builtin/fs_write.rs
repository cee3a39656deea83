// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::resolve_path;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Parent directories \
         are created as needed. For small changes to an existing file prefer \
         edit_file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "Complete file content"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let Some(content) = call.args.get("content").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'content'");
        };
        let resolved = match resolve_path(&ctx.working_dir, path, ctx.sandboxed) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("cannot create parent dirs: {e}"));
            }
        }
        debug!(path = %resolved.display(), bytes = content.len(), "write_file");
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("Wrote {} bytes to {path}", content.len()),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("cannot write '{path}': {e}")),
        }
    }
}

pub struct CreateDirectoryTool;

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a directory (and any missing parents) inside the project."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to the project root"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let resolved = match resolve_path(&ctx.working_dir, path, ctx.sandboxed) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        match tokio::fs::create_dir_all(&resolved).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("Created directory {path}")),
            Err(e) => ToolOutput::err(&call.id, format!("cannot create '{path}': {e}")),
        }
    }
}

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file, or a directory recursively. There is no undo beyond \
         checkpoints — create one first when removing anything substantial."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File or directory path relative to the project root"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let resolved = match resolve_path(&ctx.working_dir, path, ctx.sandboxed) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let meta = match tokio::fs::metadata(&resolved).await {
            Ok(m) => m,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot delete '{path}': {e}")),
        };
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&resolved).await
        } else {
            tokio::fs::remove_file(&resolved).await
        };
        match result {
            Ok(()) => ToolOutput::ok(&call.id, format!("Deleted {path}")),
            Err(e) => ToolOutput::err(&call.id, format!("cannot delete '{path}': {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
