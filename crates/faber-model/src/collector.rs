// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::{ResponseEvent, ThinkStripper, ToolCallRequest};

/// Assembles one model turn from a stream of [`ResponseEvent`]s.
///
/// Content deltas are filtered through the think-span stripper before being
/// surfaced; tool-call fragments are accumulated per provider index until the
/// stream terminates.  The caller drives the stream and forwards whatever
/// [`absorb`](Self::absorb) returns to its own output channel.
#[derive(Default)]
pub struct StreamCollector {
    stripper: ThinkStripper,
    content: String,
    /// Keyed by the parallel-tool-call index from the provider.  OpenAI
    /// interleaves fragments for different calls by index; most providers
    /// only ever use index 0.
    pending: BTreeMap<u32, PendingToolCall>,
    finish_reason: Option<String>,
}

/// The assembled result of one streamed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Visible (think-stripped) assistant text.
    pub content: String,
    /// Provider finish reason; `"tool_calls"` means the loop continues.
    pub finish_reason: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one event.  Returns newly visible text, if any.
    pub fn absorb(&mut self, event: ResponseEvent) -> Option<String> {
        match event {
            ResponseEvent::TextDelta(delta) => {
                let visible = self.stripper.push(&delta);
                if visible.is_empty() {
                    None
                } else {
                    self.content.push_str(&visible);
                    Some(visible)
                }
            }
            ResponseEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let ptc = self.pending.entry(index).or_default();
                if !id.is_empty() {
                    ptc.id = id;
                }
                if !name.is_empty() {
                    ptc.name = name;
                }
                ptc.args_buf.push_str(&arguments);
                None
            }
            ResponseEvent::FinishReason(reason) => {
                self.finish_reason = Some(reason);
                None
            }
            ResponseEvent::Done => None,
        }
    }

    /// Finalize the turn: flush the stripper and resolve pending tool calls
    /// in index order.
    pub fn finish(mut self) -> TurnOutcome {
        let tail = self.stripper.finish();
        self.content.push_str(&tail);

        let mut tool_calls = Vec::with_capacity(self.pending.len());
        for (i, (_, ptc)) in self.pending.into_iter().enumerate() {
            // A call with an empty name cannot be dispatched; storing it would
            // corrupt the history sent back on the next round.
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name");
                continue;
            }
            let mut tc = ptc.resolve();
            if tc.id.is_empty() {
                tc.id = format!("tc_synthetic_{i}");
                warn!(tool_name = %tc.name, "tool call had empty id; generated synthetic id");
            }
            tool_calls.push(tc);
        }

        TurnOutcome {
            content: self.content,
            finish_reason: self.finish_reason,
            tool_calls,
        }
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Parse accumulated arguments into a JSON object, repairing common
    /// model-emitted syntax errors before giving up and substituting `{}`.
    fn resolve(self) -> ToolCallRequest {
        let args = if self.args_buf.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(parse_err) => match attempt_json_repair(&self.args_buf) {
                    Some(v) => {
                        warn!(
                            tool_name = %self.name,
                            "repaired invalid JSON arguments from model"
                        );
                        v
                    }
                    None => {
                        warn!(
                            tool_name = %self.name,
                            error = %parse_err,
                            "tool call arguments unparseable; substituting {{}}"
                        );
                        Value::Object(Default::default())
                    }
                },
            }
        };
        ToolCallRequest {
            id: self.id,
            name: self.name,
            args,
        }
    }
}

/// Attempt to repair common JSON syntax errors in model-emitted arguments:
/// invalid escape sequences inside string values, and truncated output
/// missing its closing quote/brace.
fn attempt_json_repair(json_str: &str) -> Option<Value> {
    let fixed = fix_invalid_json_escapes(json_str);
    if let Ok(v) = serde_json::from_str::<Value>(&fixed) {
        return Some(v);
    }

    if !fixed.trim_end().ends_with('}') {
        let mut completed = fixed.clone();
        let quote_count = fixed.chars().filter(|&c| c == '"').count();
        if quote_count % 2 == 1 {
            completed.push('"');
        }
        if !completed.trim_end().ends_with('}') {
            completed.push('}');
        }
        if let Ok(v) = serde_json::from_str::<Value>(&completed) {
            return Some(v);
        }
    }

    None
}

/// Walk through a JSON string and replace any invalid escape sequences inside
/// string values with a properly escaped backslash.
///
/// Valid JSON escape characters are: `"`, `\`, `/`, `b`, `f`, `n`, `r`, `t`, `u`.
/// Anything else (e.g. `\c`, `\(`) becomes `\\X` so serde_json can parse it.
fn fix_invalid_json_escapes(json_str: &str) -> String {
    let mut result = String::with_capacity(json_str.len() + 16);
    let mut chars = json_str.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(s: &str) -> ResponseEvent {
        ResponseEvent::TextDelta(s.to_string())
    }

    fn tc(index: u32, id: &str, name: &str, args: &str) -> ResponseEvent {
        ResponseEvent::ToolCallDelta {
            index,
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    // ── Content assembly ──────────────────────────────────────────────────────

    #[test]
    fn content_accumulates_across_deltas() {
        let mut c = StreamCollector::new();
        assert_eq!(c.absorb(delta("hel")).as_deref(), Some("hel"));
        assert_eq!(c.absorb(delta("lo")).as_deref(), Some("lo"));
        let out = c.finish();
        assert_eq!(out.content, "hello");
    }

    #[test]
    fn think_spans_never_surface() {
        let mut c = StreamCollector::new();
        let mut visible = String::new();
        for d in ["ok<thi", "nk>secret</think", ">done"] {
            if let Some(v) = c.absorb(delta(d)) {
                visible.push_str(&v);
            }
        }
        let out = c.finish();
        assert_eq!(out.content, "okdone");
        assert!(!visible.contains("secret"));
    }

    // ── Tool-call accumulation ────────────────────────────────────────────────

    #[test]
    fn fragmented_arguments_reassemble() {
        let mut c = StreamCollector::new();
        c.absorb(tc(0, "call_1", "read_file", ""));
        c.absorb(tc(0, "", "", "{\"pa"));
        c.absorb(tc(0, "", "", "th\": \"a.txt\"}"));
        c.absorb(ResponseEvent::FinishReason("tool_calls".into()));
        let out = c.finish();
        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].id, "call_1");
        assert_eq!(out.tool_calls[0].args["path"], "a.txt");
        assert_eq!(out.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn parallel_calls_ordered_by_index() {
        let mut c = StreamCollector::new();
        c.absorb(tc(1, "b", "write_file", "{}"));
        c.absorb(tc(0, "a", "read_file", "{}"));
        let out = c.finish();
        let ids: Vec<&str> = out.tool_calls.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_name_call_is_dropped() {
        let mut c = StreamCollector::new();
        c.absorb(tc(0, "x", "", "{}"));
        let out = c.finish();
        assert!(out.tool_calls.is_empty());
    }

    #[test]
    fn empty_id_gets_synthetic() {
        let mut c = StreamCollector::new();
        c.absorb(tc(0, "", "read_file", "{}"));
        let out = c.finish();
        assert_eq!(out.tool_calls[0].id, "tc_synthetic_0");
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let mut c = StreamCollector::new();
        c.absorb(tc(0, "x", "list_files", ""));
        let out = c.finish();
        assert!(out.tool_calls[0].args.is_object());
    }

    // ── JSON repair ───────────────────────────────────────────────────────────

    #[test]
    fn invalid_escape_is_repaired() {
        let v = attempt_json_repair(r#"{"path": "a\cpath"}"#).unwrap();
        assert_eq!(v["path"], "a\\cpath");
    }

    #[test]
    fn truncated_object_is_completed() {
        let v = attempt_json_repair(r#"{"path": "a.txt"#).unwrap();
        assert_eq!(v["path"], "a.txt");
    }

    #[test]
    fn garbage_is_not_repaired() {
        assert!(attempt_json_repair("][not json").is_none());
    }

    #[test]
    fn unparseable_args_fall_back_to_empty_object() {
        let mut c = StreamCollector::new();
        c.absorb(tc(0, "x", "read_file", "][bad"));
        let out = c.finish();
        assert!(out.tool_calls[0].args.as_object().unwrap().is_empty());
    }
}
