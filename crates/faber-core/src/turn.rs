// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Machinery shared by the single-agent and dual-agent loops: the retrying
//! model call, tool-call dispatch with diff capture and chunk pairing, and
//! the prose rescue parser.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use faber_config::Mode;
use faber_model::{
    error::{backoff_delay, classify, ErrorClass},
    CompletionRequest, Message, ModelProvider, StreamCollector, ToolCallRequest, TurnOutcome,
};
use faber_tools::{resolve_path, ToolCall, ToolContext, ToolRegistry};

use crate::chunk::StreamChunk;
use crate::diff::SessionDiffTracker;
use crate::store::ToolCallRecord;

/// Tools whose success mutates files and therefore feeds the diff tracker.
const MUTATING_TOOLS: &[&str] = &["write_file", "edit_file", "delete_file"];

/// How streamed model text is surfaced to the subscriber.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkStyle {
    /// `content` chunks (single-agent and Coder output).
    Content,
    /// `plan_chunk` chunks (Planner output).
    PlanChunk,
    /// Not surfaced (review and summary calls).
    Silent,
}

pub(crate) enum ModelCallError {
    /// Context-length overflow: the caller trims history and retries once.
    Overflow,
    /// The subscriber went away.
    Cancelled,
    /// Retries exhausted or a non-retryable failure.
    Fatal(String),
}

/// Call the model once (with transport retries) and collect the turn.
///
/// Retryable failures back off per the error taxonomy; a context overflow is
/// returned to the caller immediately since the fix (trimming) changes the
/// request.  Streamed text is forwarded as it arrives, filtered through the
/// think-span stripper by the collector.
pub(crate) async fn call_model(
    model: &Arc<dyn ModelProvider>,
    req: &CompletionRequest,
    tx: &mpsc::Sender<StreamChunk>,
    style: ChunkStyle,
    cancel: &mut oneshot::Receiver<()>,
) -> Result<TurnOutcome, ModelCallError> {
    let mut attempt: u32 = 0;
    loop {
        // A closed sender counts as cancellation too: the subscriber dropping
        // its handle means nobody is reading the stream anymore.
        match cancel.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => {}
            _ => return Err(ModelCallError::Cancelled),
        }

        match stream_once(model, req.clone(), tx, style, cancel).await {
            Ok(outcome) => return Ok(outcome),
            Err(StreamError::Cancelled) => return Err(ModelCallError::Cancelled),
            Err(StreamError::Failed(msg)) => {
                let class = classify(&msg);
                if class == ErrorClass::ContextOverflow {
                    return Err(ModelCallError::Overflow);
                }
                if class.is_retryable() && attempt < class.max_retries() {
                    let delay = backoff_delay(attempt);
                    warn!(attempt, class = ?class, "model call failed, backing off: {msg}");
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = &mut *cancel => return Err(ModelCallError::Cancelled),
                    }
                }
                return Err(ModelCallError::Fatal(msg));
            }
        }
    }
}

enum StreamError {
    Cancelled,
    Failed(String),
}

async fn stream_once(
    model: &Arc<dyn ModelProvider>,
    req: CompletionRequest,
    tx: &mpsc::Sender<StreamChunk>,
    style: ChunkStyle,
    cancel: &mut oneshot::Receiver<()>,
) -> Result<TurnOutcome, StreamError> {
    let mut stream = tokio::select! {
        result = model.complete(req) => match result {
            Ok(s) => s,
            Err(e) => return Err(StreamError::Failed(format!("{e:#}"))),
        },
        _ = &mut *cancel => return Err(StreamError::Cancelled),
    };

    let mut collector = StreamCollector::new();
    loop {
        let event = tokio::select! {
            ev = stream.next() => ev,
            _ = &mut *cancel => return Err(StreamError::Cancelled),
        };
        let Some(event) = event else { break };
        let event = match event {
            Ok(ev) => ev,
            Err(e) => return Err(StreamError::Failed(format!("{e:#}"))),
        };
        if let Some(visible) = collector.absorb(event) {
            let chunk = match style {
                ChunkStyle::Content => Some(StreamChunk::Content { content: visible }),
                ChunkStyle::PlanChunk => Some(StreamChunk::PlanChunk { content: visible }),
                ChunkStyle::Silent => None,
            };
            if let Some(chunk) = chunk {
                if tx.send(chunk).await.is_err() {
                    return Err(StreamError::Cancelled);
                }
            }
        }
    }

    Ok(collector.finish())
}

/// What one batch of tool calls did.
pub(crate) struct DispatchOutcome {
    pub any_error: bool,
    pub any_blocked: bool,
    pub called_task_list: bool,
    /// `sort(tool:first_arg)` joined with `|` — the loop-detection signature.
    pub signature: String,
    pub records: Vec<ToolCallRecord>,
}

/// Execute a batch of tool calls sequentially, in model order.
///
/// For each call: honor the plan-mode allow-list, capture the diff
/// pre-image, emit the start chunk, execute, capture the post-image, emit
/// the end chunk, and append the assistant/tool message pair to `messages`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn dispatch_tool_calls(
    registry: &Arc<ToolRegistry>,
    ctx: &ToolContext,
    mode: Mode,
    calls: &[ToolCallRequest],
    tx: &mpsc::Sender<StreamChunk>,
    diffs: &mut SessionDiffTracker,
    messages: &mut Vec<Message>,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome {
        any_error: false,
        any_blocked: false,
        called_task_list: false,
        signature: String::new(),
        records: Vec::with_capacity(calls.len()),
    };
    let mut signature_parts: Vec<String> = Vec::with_capacity(calls.len());

    for call in calls {
        signature_parts.push(format!("{}:{}", call.name, first_arg_string(&call.args)));
        if call.name == "task_list" {
            outcome.called_task_list = true;
        }

        messages.push(Message::tool_call(&call.id, &call.name, &call.args));
        let _ = tx
            .send(StreamChunk::tool_call_start(&call.name, &call.id, &call.args))
            .await;

        let result = if mode == Mode::Plan && !registry.is_read_only(&call.name) {
            faber_tools::ToolOutput::err(
                &call.id,
                format!(
                    "'{}' is not available in plan mode. Only read-only tools \
                     may run until the user approves a plan.",
                    call.name
                ),
            )
        } else if !registry.contains(&call.name) {
            faber_tools::ToolOutput::err(&call.id, format!("unknown tool: {}", call.name))
        } else {
            let mutating = MUTATING_TOOLS.contains(&call.name.as_str());
            let touched = if mutating {
                resolve_mutation_target(ctx, &call.args)
            } else {
                None
            };
            if let Some((abs, rel)) = &touched {
                diffs.capture_before(abs, rel);
            }
            let tool_call = ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
            };
            let output = registry.execute(&tool_call, ctx).await;
            if output.success {
                if let Some((abs, _)) = &touched {
                    diffs.capture_after(abs);
                }
            }
            output
        };

        debug!(tool = %call.name, success = result.success, "tool executed");
        if !result.success {
            outcome.any_error = true;
            if result.result.contains("BLOCKED") {
                outcome.any_blocked = true;
            }
        }

        let _ = tx
            .send(StreamChunk::tool_call_end(
                &call.name,
                &call.id,
                &result.result,
                result.success,
            ))
            .await;

        outcome
            .records
            .push(ToolCallRecord::new(&call.name, &call.args, result.success, &result.result));
        messages.push(Message::tool_result(&call.id, &result.result));
    }

    signature_parts.sort();
    outcome.signature = signature_parts.join("|");
    outcome
}

/// Command-output callback wired into the tool context.
///
/// Enqueues synchronously on the turn's channel so ordering relative to the
/// surrounding tool start/end chunks is preserved (the tool finishes — and
/// therefore all its callback sends happen — before the end chunk is sent).
/// Uses `try_send`: under hard backpressure a tail line is dropped rather
/// than blocking the executing tool.
pub(crate) fn command_output_callback(
    tx: &mpsc::Sender<StreamChunk>,
) -> faber_tools::CommandOutputFn {
    let tx = tx.clone();
    Arc::new(move |call_id: &str, chunk: &str| {
        let _ = tx.try_send(StreamChunk::CommandOutput {
            tool_call_id: call_id.to_string(),
            content: chunk.to_string(),
        });
    })
}

/// Resolve the file a mutating call is about to touch, for diff capture.
fn resolve_mutation_target(ctx: &ToolContext, args: &Value) -> Option<(PathBuf, String)> {
    let rel = args.get("path")?.as_str()?;
    let abs = resolve_path(&ctx.working_dir, rel, ctx.sandboxed).ok()?;
    Some((abs, rel.to_string()))
}

/// First argument value rendered as a short string, for loop signatures.
pub(crate) fn first_arg_string(args: &Value) -> String {
    let Some(obj) = args.as_object() else {
        return String::new();
    };
    obj.values()
        .next()
        .map(|v| match v {
            Value::String(s) => s.chars().take(80).collect(),
            other => other.to_string().chars().take(80).collect(),
        })
        .unwrap_or_default()
}

/// Tool-call markup written into the text stream instead of the structured
/// protocol.  Some fine-tuned models fall back to XML-style or Hermes-style
/// function tags even when real tool calls are available; the loops answer
/// with a format-correction nudge.
pub(crate) fn contains_malformed_tool_markup(text: &str) -> bool {
    text.contains("<tool_call>")
        || text.contains("</tool_call>")
        || text.contains("<function=")
        || text.contains("[TOOL_CALL]")
}

/// Rescue a tool call the model wrote as JSON prose instead of a structured
/// call.  Honored only when the message carried no structured calls —
/// structured calls always win.
pub(crate) fn extract_tool_call_from_prose(
    content: &str,
    registry: &ToolRegistry,
) -> Option<ToolCallRequest> {
    for candidate in json_candidates(content) {
        let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        let name = value
            .get("name")
            .or_else(|| value.get("tool"))
            .and_then(|v| v.as_str())?
            .to_string();
        if !registry.contains(&name) {
            continue;
        }
        let args = value
            .get("arguments")
            .or_else(|| value.get("args"))
            .or_else(|| value.get("parameters"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        if !args.is_object() {
            continue;
        }
        return Some(ToolCallRequest {
            id: "rescued_0".to_string(),
            name,
            args,
        });
    }
    None
}

/// JSON object candidates in `content`: fenced ```json blocks first, then
/// bare top-level `{…}` spans found by brace matching.
fn json_candidates(content: &str) -> Vec<String> {
    let mut out = Vec::new();

    let mut rest = content;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            out.push(after[..end].trim().to_string());
            rest = &after[end + 3..];
        } else {
            break;
        }
    }

    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let mut depth = 0usize;
            let mut in_string = false;
            let mut escaped = false;
            for (j, &b) in bytes.iter().enumerate().skip(i) {
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if b == b'\\' {
                        escaped = true;
                    } else if b == b'"' {
                        in_string = false;
                    }
                    continue;
                }
                match b {
                    b'"' => in_string = true,
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            out.push(content[i..=j].to_string());
                            i = j;
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
        i += 1;
    }

    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
