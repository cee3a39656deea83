// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

const ENV_FILE: &str = ".env";

/// Manage the project's `.env` file.
///
/// Values are masked on read so secrets never round-trip through the model's
/// context; writes re-quote values that contain whitespace, quotes or `#`.
pub struct ManageEnvTool;

#[async_trait]
impl Tool for ManageEnvTool {
    fn name(&self) -> &str {
        "manage_env"
    }

    fn description(&self) -> &str {
        "Manage .env variables. action='set' writes KEY=VALUE (quoting when \
         needed), action='unset' removes a key, action='get' and 'list' show \
         keys with masked values — values are never revealed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["set", "unset", "get", "list"],
                    "description": "Operation on the .env file"
                },
                "key": {
                    "type": "string",
                    "description": "Variable name (for set/unset/get)"
                },
                "value": {
                    "type": "string",
                    "description": "Variable value (for set)"
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
        let path = ctx.working_dir.join(ENV_FILE);
        let mut entries = parse_env(&std::fs::read_to_string(&path).unwrap_or_default());

        match action {
            "set" => {
                let (Some(key), Some(value)) = (
                    call.args.get("key").and_then(|v| v.as_str()),
                    call.args.get("value").and_then(|v| v.as_str()),
                ) else {
                    return ToolOutput::err(&call.id, "action='set' needs 'key' and 'value'");
                };
                if !is_valid_key(key) {
                    return ToolOutput::err(&call.id, format!("invalid key '{key}'"));
                }
                match entries.iter_mut().find(|(k, _)| k == key) {
                    Some(entry) => entry.1 = value.to_string(),
                    None => entries.push((key.to_string(), value.to_string())),
                }
                match std::fs::write(&path, render_env(&entries)) {
                    Ok(()) => ToolOutput::ok(&call.id, format!("Set {key}")),
                    Err(e) => ToolOutput::err(&call.id, format!("cannot write .env: {e}")),
                }
            }
            "unset" => {
                let Some(key) = call.args.get("key").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "action='unset' needs 'key'");
                };
                let before = entries.len();
                entries.retain(|(k, _)| k != key);
                if entries.len() == before {
                    return ToolOutput::err(&call.id, format!("no variable '{key}'"));
                }
                match std::fs::write(&path, render_env(&entries)) {
                    Ok(()) => ToolOutput::ok(&call.id, format!("Removed {key}")),
                    Err(e) => ToolOutput::err(&call.id, format!("cannot write .env: {e}")),
                }
            }
            "get" => {
                let Some(key) = call.args.get("key").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "action='get' needs 'key'");
                };
                match entries.iter().find(|(k, _)| k == key) {
                    Some((k, v)) => ToolOutput::ok(&call.id, format!("{k}={}", mask(v))),
                    None => ToolOutput::err(&call.id, format!("no variable '{key}'")),
                }
            }
            "list" => {
                if entries.is_empty() {
                    return ToolOutput::ok(&call.id, "No .env variables set.");
                }
                let lines: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k}={}", mask(v)))
                    .collect();
                ToolOutput::ok(&call.id, lines.join("\n"))
            }
            other => ToolOutput::err(&call.id, format!("unknown action '{other}'")),
        }
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.chars().next().unwrap_or('0').is_ascii_digit()
}

/// Parse KEY=VALUE lines, honouring single/double quoting and skipping
/// comments and blanks.  Order is preserved for faithful rewrites.
fn parse_env(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let mut value = value.trim();
        if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
            || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
        {
            value = &value[1..value.len() - 1];
        }
        out.push((key, value.to_string()));
    }
    out
}

/// Render entries back to file form, quoting values that contain whitespace,
/// quotes or `#`.
fn render_env(entries: &[(String, String)]) -> String {
    let mut out = String::new();
    for (k, v) in entries {
        let needs_quotes =
            v.chars().any(char::is_whitespace) || v.contains('"') || v.contains('\'') || v.contains('#');
        if needs_quotes {
            out.push_str(&format!("{k}=\"{}\"\n", v.replace('"', "\\\"")));
        } else {
            out.push_str(&format!("{k}={v}\n"));
        }
    }
    out
}

/// Mask a value for display: first two characters plus a fixed tail.
fn mask(value: &str) -> String {
    if value.is_empty() {
        return String::from("(empty)");
    }
    let prefix: String = value.chars().take(2).collect();
    format!("{prefix}****")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
