// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::sandbox::resolve_path;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Lines shown before a file read is truncated.
const READ_LINE_CAP: usize = 500;
/// Per-file line cap for batched reads.
const MULTI_LINE_CAP: usize = 200;
/// Maximum files per `read_multiple_files` call.
const MULTI_FILE_CAP: usize = 20;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the project. Shows up to 500 lines; longer files are \
         truncated with a count of the omitted remainder. Always read a file \
         before editing it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the project root"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let resolved = match resolve_path(&ctx.working_dir, path, ctx.sandboxed) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(text) => ToolOutput::ok(&call.id, truncate_lines(&text, READ_LINE_CAP)),
            Err(e) => ToolOutput::err(&call.id, format!("cannot read '{path}': {e}")),
        }
    }
}

pub struct ReadMultipleFilesTool;

#[async_trait]
impl Tool for ReadMultipleFilesTool {
    fn name(&self) -> &str {
        "read_multiple_files"
    }

    fn description(&self) -> &str {
        "Read up to 20 files in one call (200 lines each). Use this to gather \
         context across several related files instead of issuing many single reads."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "File paths relative to the project root (max 20)"
                }
            },
            "required": ["paths"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(paths) = call.args.get("paths").and_then(|v| v.as_array()) else {
            return ToolOutput::err(&call.id, "missing 'paths' array");
        };
        if paths.len() > MULTI_FILE_CAP {
            return ToolOutput::err(
                &call.id,
                format!("too many files: {} (max {MULTI_FILE_CAP})", paths.len()),
            );
        }

        let mut sections = Vec::with_capacity(paths.len());
        for p in paths {
            let Some(path) = p.as_str() else { continue };
            let body = match resolve_path(&ctx.working_dir, path, ctx.sandboxed) {
                Ok(resolved) => match tokio::fs::read_to_string(&resolved).await {
                    Ok(text) => truncate_lines(&text, MULTI_LINE_CAP),
                    Err(e) => format!("[error: {e}]"),
                },
                Err(e) => format!("[error: {e}]"),
            };
            sections.push(format!("=== {path} ===\n{body}"));
        }

        if sections.is_empty() {
            return ToolOutput::err(&call.id, "no readable files in 'paths'");
        }
        ToolOutput::ok(&call.id, sections.join("\n\n"))
    }
}

/// Keep the first `cap` lines, appending an omission count when truncated.
pub(crate) fn truncate_lines(text: &str, cap: usize) -> String {
    let total = text.lines().count();
    if total <= cap {
        return text.to_string();
    }
    let shown: Vec<&str> = text.lines().take(cap).collect();
    format!(
        "{}\n... ({} more lines not shown)",
        shown.join("\n"),
        total - cap
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
