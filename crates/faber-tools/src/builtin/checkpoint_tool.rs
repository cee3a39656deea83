// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::checkpoint::CheckpointStore;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

pub struct CheckpointTool;

#[async_trait]
impl Tool for CheckpointTool {
    fn name(&self) -> &str {
        "checkpoint"
    }

    fn description(&self) -> &str {
        "Snapshot or restore project state. action='create' (optional 'name') \
         copies the project into .checkpoints/. action='list' shows existing \
         snapshots. action='rollback' with 'id' copies a snapshot's files \
         back; files created after the snapshot are kept."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "rollback", "list"],
                    "description": "Checkpoint operation"
                },
                "name": {
                    "type": "string",
                    "description": "Label for action='create'"
                },
                "id": {
                    "type": "string",
                    "description": "Checkpoint id for action='rollback'"
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(action) = call.args.get("action").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'action'");
        };
        let store = CheckpointStore::new(&ctx.working_dir);

        match action {
            "create" => {
                let name = call.args.get("name").and_then(|v| v.as_str()).unwrap_or("");
                match store.create(name) {
                    Ok(m) => ToolOutput::ok(
                        &call.id,
                        format!("Created checkpoint {} ({} files)", m.id, m.file_count),
                    ),
                    Err(e) => ToolOutput::err(&call.id, format!("Tool error: {e}")),
                }
            }
            "list" => {
                let manifests = store.list();
                if manifests.is_empty() {
                    return ToolOutput::ok(&call.id, "No checkpoints exist.");
                }
                let lines: Vec<String> = manifests
                    .iter()
                    .map(|m| format!("{} — {} files, created {}", m.id, m.file_count, m.created_at))
                    .collect();
                ToolOutput::ok(&call.id, lines.join("\n"))
            }
            "rollback" => {
                let Some(id) = call.args.get("id").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "action='rollback' needs 'id'");
                };
                match store.rollback(id) {
                    Ok(n) => ToolOutput::ok(
                        &call.id,
                        format!(
                            "Rolled back to {id}: {n} files restored. Files created \
                             after the snapshot were left in place."
                        ),
                    ),
                    Err(e) => ToolOutput::err(&call.id, format!("{e}")),
                }
            }
            other => ToolOutput::err(&call.id, format!("unknown action '{other}'")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
