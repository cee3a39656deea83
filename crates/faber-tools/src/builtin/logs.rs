// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Default number of log lines returned.
const DEFAULT_TAIL: usize = 50;

pub struct ReadLogsTool;

#[async_trait]
impl Tool for ReadLogsTool {
    fn name(&self) -> &str {
        "read_logs"
    }

    fn description(&self) -> &str {
        "Read the most recent output of the running project (stdout + stderr \
         captured by the supervisor). Use this to diagnose runtime errors \
         instead of re-running the server yourself."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lines": {
                    "type": "integer",
                    "description": "How many trailing lines to return (default 50)"
                }
            },
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let lines = call
            .args
            .get("lines")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TAIL as u64)
            .min(1000) as usize;

        let Some(runtime) = &ctx.runtime else {
            return ToolOutput::ok(
                &call.id,
                "The project is not running under the supervisor, so there are \
                 no logs to read.",
            );
        };

        let tail = runtime.tail_logs(&ctx.working_dir, lines).await;
        if tail.is_empty() {
            ToolOutput::ok(&call.id, "No log output captured yet.")
        } else {
            ToolOutput::ok(&call.id, tail.join("\n"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
