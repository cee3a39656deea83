// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::sandbox::resolve_path;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Literal substring replacement.  When `old_string` is absent the file is
/// left byte-identical and the model is told to re-read — stale context is
/// the usual cause of a failed edit.
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact substring in a file. 'old_string' must match the \
         current file content literally (including whitespace); if it does \
         not, read the file again and retry with the exact text. Replaces \
         the first occurrence."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the project root"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let Some(old_string) = call.args.get("old_string").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'old_string'");
        };
        let Some(new_string) = call.args.get("new_string").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'new_string'");
        };
        if old_string.is_empty() {
            return ToolOutput::err(&call.id, "'old_string' must not be empty");
        }

        let resolved = match resolve_path(&ctx.working_dir, path, ctx.sandboxed) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot read '{path}': {e}")),
        };

        let Some(pos) = content.find(old_string) else {
            return ToolOutput::err(
                &call.id,
                format!(
                    "old_string not found in '{path}'. The file content differs from \
                     what you expected — read the file again and retry with the exact \
                     current text."
                ),
            );
        };

        let mut updated = String::with_capacity(content.len() + new_string.len());
        updated.push_str(&content[..pos]);
        updated.push_str(new_string);
        updated.push_str(&content[pos + old_string.len()..]);

        match tokio::fs::write(&resolved, &updated).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("Edited {path}")),
            Err(e) => ToolOutput::err(&call.id, format!("cannot write '{path}': {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "edit_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn replaces_first_occurrence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello world hello").unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = EditFileTool
            .execute(
                &call(json!({"path": "a.txt", "old_string": "hello", "new_string": "goodbye"})),
                &ctx,
            )
            .await;
        assert!(out.success, "{}", out.result);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "goodbye world hello"
        );
    }

    #[tokio::test]
    async fn absent_old_string_leaves_file_byte_identical() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "original content").unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = EditFileTool
            .execute(
                &call(json!({"path": "a.txt", "old_string": "missing", "new_string": "x"})),
                &ctx,
            )
            .await;
        assert!(!out.success);
        assert!(out.result.contains("not found"));
        assert!(out.result.contains("read the file again"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "original content"
        );
    }

    #[tokio::test]
    async fn multiline_replacement_preserves_surroundings() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.js"), "a\nfn old() {\n  1\n}\nz\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = EditFileTool
            .execute(
                &call(json!({
                    "path": "a.js",
                    "old_string": "fn old() {\n  1\n}",
                    "new_string": "fn new() {\n  2\n}"
                })),
                &ctx,
            )
            .await;
        assert!(out.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.js")).unwrap(),
            "a\nfn new() {\n  2\n}\nz\n"
        );
    }

    #[tokio::test]
    async fn empty_old_string_is_refused() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = EditFileTool
            .execute(
                &call(json!({"path": "a.txt", "old_string": "", "new_string": "y"})),
                &ctx,
            )
            .await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = EditFileTool
            .execute(
                &call(json!({"path": "gone.txt", "old_string": "a", "new_string": "b"})),
                &ctx,
            )
            .await;
        assert!(!out.success);
    }
}
