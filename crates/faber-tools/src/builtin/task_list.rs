// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tasks::{TaskStatus, TaskStore};
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Create, update, or read the project task list.
///
/// The list drives the UI progress display, so the agent is expected to keep
/// it current while working through a plan.
pub struct TaskListTool;

#[async_trait]
impl Tool for TaskListTool {
    fn name(&self) -> &str {
        "task_list"
    }

    fn description(&self) -> &str {
        "Manage the build task list. action='create' with 'titles' replaces \
         the list (first task becomes in_progress). action='update' with 'id' \
         and 'status' changes one task — completing a task automatically \
         starts the next pending one. action='get' returns the current list."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "update", "get"],
                    "description": "What to do with the task list"
                },
                "titles": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Task titles, for action='create'"
                },
                "id": {
                    "type": "string",
                    "description": "Task id, for action='update'"
                },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed"],
                    "description": "New status, for action='update'"
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
        let store = TaskStore::new(&ctx.working_dir);

        match action {
            "create" => {
                let titles: Vec<String> = call
                    .args
                    .get("titles")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                if titles.is_empty() {
                    return ToolOutput::err(&call.id, "action='create' needs a non-empty 'titles' array");
                }
                match store.create(titles) {
                    Ok(tasks) => ToolOutput::ok(&call.id, render(&tasks)),
                    Err(e) => ToolOutput::err(&call.id, format!("Tool error: {e}")),
                }
            }
            "update" => {
                let Some(id) = call.args.get("id").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "action='update' needs 'id'");
                };
                let status = match call.args.get("status").and_then(|v| v.as_str()) {
                    Some("pending") => TaskStatus::Pending,
                    Some("in_progress") => TaskStatus::InProgress,
                    Some("completed") => TaskStatus::Completed,
                    _ => {
                        return ToolOutput::err(
                            &call.id,
                            "action='update' needs 'status' of pending|in_progress|completed",
                        )
                    }
                };
                match store.update(id, status) {
                    Ok(tasks) => ToolOutput::ok(&call.id, render(&tasks)),
                    Err(e) => ToolOutput::err(&call.id, format!("{e}")),
                }
            }
            "get" => {
                let tasks = store.load();
                if tasks.is_empty() {
                    ToolOutput::ok(&call.id, "No task list exists yet.")
                } else {
                    ToolOutput::ok(&call.id, render(&tasks))
                }
            }
            other => ToolOutput::err(&call.id, format!("unknown action '{other}'")),
        }
    }
}

fn render(tasks: &[crate::tasks::Task]) -> String {
    tasks
        .iter()
        .map(|t| {
            let mark = match t.status {
                TaskStatus::Pending => " ",
                TaskStatus::InProgress => ">",
                TaskStatus::Completed => "x",
            };
            format!("[{mark}] {} — {}", t.id, t.title)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
