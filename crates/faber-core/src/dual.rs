// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The dual-model planner/coder loop.
//!
//! The Planner (never tooled) decomposes the request into `<coder_task>`
//! blocks; the Coder implements each task under focused context with the
//! full tool catalogue; a final Planner pass reviews the run.  If the
//! Planner fails or produces nothing usable, the whole turn silently falls
//! back to the single-agent loop.

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use std::sync::OnceLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use faber_config::Mode;
use faber_model::{CompletionRequest, Message, ModelProvider, ToolSchema};
use faber_tools::{TaskStatus, TaskStore, ToolContext};

use crate::chunk::StreamChunk;
use crate::diff::SessionDiffTracker;
use crate::history::build_model_messages;
use crate::plan;
use crate::prompts::{
    coder_task_prompt, review_prompt, PLANNER_APPROVAL_NUDGE, PLANNER_DETAIL_NUDGE,
    PLANNER_EMPTY_NUDGE, PLANNER_PROMPT,
};
use crate::single::{SingleAgent, TurnRequest};
use crate::store::{Conversation, MessageRole, MessageStatus, NewMessage};
use crate::turn::{
    call_model, contains_malformed_tool_markup, dispatch_tool_calls, ChunkStyle, ModelCallError,
};

/// Description length below which a task is considered too thin.
const MIN_DESCRIPTION_CHARS: usize = 20;
/// Lines of each relevant file given to the Coder.
const RELEVANT_FILE_LINE_CAP: usize = 300;
/// Prior task summaries carried into the next task's prompt.
const CARRIED_SUMMARIES: usize = 5;
/// Identical action signatures tolerated before warning / breaking.
const LOOP_WARN_REPEATS: u32 = 2;
const LOOP_BREAK_REPEATS: u32 = 3;
/// Blocked-command results tolerated per task.
const MAX_BLOCKED_PER_TASK: u32 = 2;
/// Text-only nudges per task.
const MAX_TEXT_NUDGES: u32 = 3;
/// Error-rate window and threshold.
const ERROR_WINDOW: usize = 6;
const ERROR_WINDOW_LIMIT: usize = 3;

/// One parsed Planner task block.
#[derive(Debug, Clone, PartialEq)]
pub struct CoderTask {
    pub id: usize,
    pub description: String,
    pub relevant_files: Vec<String>,
    pub relevant_context: String,
}

pub struct DualAgent {
    planner: Arc<dyn ModelProvider>,
    coder: Arc<dyn ModelProvider>,
    /// The fallback loop; also supplies store, registry, and settings.
    fallback: SingleAgent,
}

impl DualAgent {
    pub fn new(
        planner: Arc<dyn ModelProvider>,
        coder: Arc<dyn ModelProvider>,
        fallback: SingleAgent,
    ) -> Self {
        Self {
            planner,
            coder,
            fallback,
        }
    }

    pub async fn run_turn(
        &self,
        req: TurnRequest,
        tx: mpsc::Sender<StreamChunk>,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let conversation = match self.fallback.store().conversation(&req.conversation_id).await? {
            Some(c) => c,
            None => {
                let _ = tx
                    .send(StreamChunk::Error {
                        content: format!("unknown conversation '{}'", req.conversation_id),
                    })
                    .await;
                let _ = tx.send(StreamChunk::Done).await;
                return Ok(());
            }
        };

        // Plan approval in prose forces build mode for the rest of the turn.
        let approved = plan::is_prose_approval(&req.user_text)
            || plan::extract_approved_plan(&req.user_text).is_some();
        let mode = if approved { Mode::Build } else { conversation.mode };

        match self
            .plan_phase(&conversation, &req, mode, approved, &tx, &mut cancel)
            .await
        {
            PlanPhaseResult::Tasks(tasks) => {
                self.execute_tasks(&conversation, &req, mode, tasks, &tx, &mut cancel)
                    .await?;
                let _ = tx.send(StreamChunk::Done).await;
                Ok(())
            }
            PlanPhaseResult::PlainResponse(content) => {
                let is_plan = mode == Mode::Plan && plan::detect_plan(&content);
                if is_plan {
                    let _ = tx
                        .send(StreamChunk::Plan {
                            content: content.clone(),
                        })
                        .await;
                } else {
                    let _ = tx
                        .send(StreamChunk::Content {
                            content: content.clone(),
                        })
                        .await;
                }
                self.persist(&conversation, &req.user_text, if is_plan {
                    MessageRole::Plan
                } else {
                    MessageRole::Assistant
                }, &content)
                .await?;
                let _ = tx.send(StreamChunk::Done).await;
                Ok(())
            }
            PlanPhaseResult::Fallback => {
                debug!("planner unusable; delegating to single-agent loop");
                self.fallback.run_turn(req, tx, cancel).await
            }
            PlanPhaseResult::Cancelled => Ok(()),
        }
    }

    async fn plan_phase(
        &self,
        conversation: &Conversation,
        req: &TurnRequest,
        mode: Mode,
        approved: bool,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> PlanPhaseResult {
        let prior = match self.fallback.store().messages(&conversation.id).await {
            Ok(p) => p,
            Err(_) => return PlanPhaseResult::Fallback,
        };

        let mut user_text = req.user_text.clone();
        if approved {
            user_text.push_str("\n\n");
            user_text.push_str(PLANNER_APPROVAL_NUDGE);
        }

        let mut messages = build_model_messages(PLANNER_PROMPT, &prior);
        messages.push(Message::user(&user_text));

        let mut content = match self.call_planner(&messages, tx, cancel).await {
            Ok(c) => c,
            Err(ModelCallError::Cancelled) => return PlanPhaseResult::Cancelled,
            Err(_) => return PlanPhaseResult::Fallback,
        };
        if content.trim().is_empty() {
            return PlanPhaseResult::Fallback;
        }

        let mut tasks = parse_coder_tasks(&content);

        // Quality gate: all-thin descriptions get one re-prompt for detail.
        if !tasks.is_empty()
            && tasks
                .iter()
                .all(|t| t.description.chars().count() < MIN_DESCRIPTION_CHARS)
        {
            messages.push(Message::assistant(&content));
            messages.push(Message::user(PLANNER_DETAIL_NUDGE));
            if let Ok(retry) = self.call_planner(&messages, tx, cancel).await {
                let retry_tasks = parse_coder_tasks(&retry);
                if !retry_tasks.is_empty() {
                    content = retry;
                    tasks = retry_tasks;
                }
            }
        }

        // Build mode with zero tasks gets one re-prompt demanding blocks.
        if tasks.is_empty() && mode == Mode::Build {
            messages.push(Message::assistant(&content));
            messages.push(Message::user(PLANNER_EMPTY_NUDGE));
            match self.call_planner(&messages, tx, cancel).await {
                Ok(retry) => {
                    tasks = parse_coder_tasks(&retry);
                    if tasks.is_empty() {
                        content = retry;
                    }
                }
                Err(ModelCallError::Cancelled) => return PlanPhaseResult::Cancelled,
                Err(_) => return PlanPhaseResult::Fallback,
            }
        }

        if tasks.is_empty() || mode == Mode::Plan {
            // A plain response (possibly a plan in plan mode).
            let cleaned = strip_task_blocks(&content);
            if cleaned.trim().is_empty() {
                return PlanPhaseResult::Fallback;
            }
            return PlanPhaseResult::PlainResponse(cleaned);
        }

        PlanPhaseResult::Tasks(tasks)
    }

    async fn call_planner(
        &self,
        messages: &[Message],
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<String, ModelCallError> {
        let settings = self.fallback.settings();
        let request = CompletionRequest {
            model: settings.planner_model().to_string(),
            messages: messages.to_vec(),
            // The Planner is never given function schemas.
            tools: vec![],
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            stream: true,
        };
        let outcome = call_model(&self.planner, &request, tx, ChunkStyle::PlanChunk, cancel).await?;
        Ok(outcome.content)
    }

    async fn execute_tasks(
        &self,
        conversation: &Conversation,
        req: &TurnRequest,
        mode: Mode,
        tasks: Vec<CoderTask>,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let settings = self.fallback.settings().clone();
        let project = conversation.project_path.clone();
        let registry = Arc::clone(self.fallback.registry());

        self.fallback
            .store()
            .append_message(NewMessage {
                conversation_id: conversation.id.clone(),
                role: MessageRole::User,
                content: req.user_text.clone(),
                tool_calls: None,
                status: MessageStatus::Complete,
            })
            .await?;

        // Materialize the task list for the UI.
        let task_store = project.as_deref().map(TaskStore::new);
        if let Some(store) = &task_store {
            let titles: Vec<String> = tasks.iter().map(|t| t.description.clone()).collect();
            if let Ok(created) = store.create(titles) {
                let _ = tx.send(StreamChunk::Tasks { tasks: created }).await;
            }
        }

        let mut ctx = ToolContext::new(
            project
                .clone()
                .unwrap_or_else(|| std::path::PathBuf::from(".")),
        );
        ctx.sandboxed = settings.sandbox.enabled;
        ctx.runtime = self.fallback.runtime();

        ctx.on_command_output = Some(crate::turn::command_output_callback(tx));

        let schemas: Vec<ToolSchema> = registry
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let mut diffs = SessionDiffTracker::new();
        let mut all_records = Vec::new();
        let mut summaries: Vec<String> = Vec::new();
        let mut task_reports: Vec<String> = Vec::new();
        let mut total_errors = 0usize;
        let mut overall_iterations: u32 = 0;

        for task in &tasks {
            let report = self
                .run_coder_task(
                    task,
                    &ctx,
                    &registry,
                    &schemas,
                    &project,
                    &summaries,
                    &mut diffs,
                    &mut overall_iterations,
                    tx,
                    cancel,
                )
                .await;
            let report = match report {
                Ok(r) => r,
                Err(ModelCallError::Cancelled) => return Ok(()),
                Err(ModelCallError::Fatal(msg)) => {
                    warn!(task = task.id, "coder task failed: {msg}");
                    TaskReport {
                        summary: format!("Task {} failed: {msg}", task.id),
                        errors: 1,
                        records: vec![],
                    }
                }
                Err(ModelCallError::Overflow) => TaskReport {
                    summary: format!("Task {} abandoned: context overflow", task.id),
                    errors: 1,
                    records: vec![],
                },
            };

            total_errors += report.errors;
            summaries.push(report.summary.clone());
            if summaries.len() > CARRIED_SUMMARIES {
                let drop_count = summaries.len() - CARRIED_SUMMARIES;
                summaries.drain(..drop_count);
            }
            task_reports.push(format!(
                "- {} — {} tool call(s), {} error(s)",
                task.description,
                report.records.len(),
                report.errors
            ));
            all_records.extend(report.records);

            // Mark completed and advance; the store keeps ≤1 in_progress.
            if let Some(store) = &task_store {
                let id = format!("task-{}", task.id);
                if let Ok(updated) = store.update(&id, TaskStatus::Completed) {
                    let _ = tx.send(StreamChunk::Tasks { tasks: updated }).await;
                }
            }

            if overall_iterations >= settings.limits.max_iterations_overall {
                warn!("overall coder iteration budget exhausted");
                break;
            }
        }

        let modified = diffs.modified_paths();
        let diff_list = diffs.into_diffs();
        if !diff_list.is_empty() {
            let _ = tx.send(StreamChunk::Diff { diffs: diff_list }).await;
        }

        // Review phase: the Planner summarizes the run for the user.
        let review = self
            .review_phase(&task_reports, modified.len(), total_errors, tx, cancel)
            .await;
        let final_content = match review {
            Some(text) => format!("**[Planner Review]** {text}"),
            None => format!(
                "Completed {} task(s); {} file(s) modified.",
                tasks.len(),
                modified.len()
            ),
        };
        let _ = tx
            .send(StreamChunk::Content {
                content: final_content.clone(),
            })
            .await;

        let msg = self
            .fallback
            .store()
            .append_message(NewMessage {
                conversation_id: conversation.id.clone(),
                role: if mode == Mode::Plan {
                    MessageRole::Plan
                } else {
                    MessageRole::Assistant
                },
                content: final_content,
                tool_calls: if all_records.is_empty() {
                    None
                } else {
                    Some(all_records)
                },
                status: MessageStatus::Streaming,
            })
            .await?;
        self.fallback.store().complete_message(&msg.id).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_coder_task(
        &self,
        task: &CoderTask,
        ctx: &ToolContext,
        registry: &Arc<faber_tools::ToolRegistry>,
        schemas: &[ToolSchema],
        project: &Option<std::path::PathBuf>,
        prior_summaries: &[String],
        diffs: &mut SessionDiffTracker,
        overall_iterations: &mut u32,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<TaskReport, ModelCallError> {
        let settings = self.fallback.settings();
        let max_per_task = settings.limits.max_iterations_per_task;

        // 1. Gather the Planner-named files from disk.
        let file_contents: Vec<(String, String)> = task
            .relevant_files
            .iter()
            .filter_map(|rel| {
                let dir = project.as_deref()?;
                let text = std::fs::read_to_string(dir.join(rel)).ok()?;
                let capped: Vec<&str> = text.lines().take(RELEVANT_FILE_LINE_CAP).collect();
                Some((rel.clone(), capped.join("\n")))
            })
            .collect();

        let prompt = coder_task_prompt(
            &task.description,
            &task.relevant_context,
            &file_contents,
            prior_summaries,
        );

        let mut messages = vec![
            Message::system(
                "You are the Coder of a two-role team. Implement exactly the task \
                 you are given, using tools. Do not re-plan or expand scope.",
            ),
            Message::user(prompt),
        ];

        let mut records = Vec::new();
        let mut errors = 0usize;
        let mut last_signature = String::new();
        let mut signature_repeats: u32 = 0;
        let mut blocked_count: u32 = 0;
        let mut text_nudges: u32 = 0;
        let mut recent_results: Vec<bool> = Vec::new();
        let mut error_rate_warned = false;
        let mut summary = format!("Task {}: {}", task.id, task.description);

        for _ in 0..max_per_task {
            *overall_iterations += 1;
            if *overall_iterations > settings.limits.max_iterations_overall {
                break;
            }
            let _ = tx
                .send(StreamChunk::IterationStatus {
                    iteration: *overall_iterations,
                    max_iterations: settings.limits.max_iterations_overall,
                    phase: format!("task {}", task.id),
                })
                .await;

            let request = CompletionRequest {
                model: settings.coder_model().to_string(),
                messages: messages.clone(),
                tools: schemas.to_vec(),
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
                stream: true,
            };
            let outcome =
                call_model(&self.coder, &request, tx, ChunkStyle::Content, cancel).await?;

            if !outcome.content.is_empty() {
                summary = outcome.content.clone();
                messages.push(Message::assistant(&outcome.content));
            }

            if outcome.tool_calls.is_empty() {
                if outcome.content.is_empty() {
                    if text_nudges >= MAX_TEXT_NUDGES {
                        break;
                    }
                    text_nudges += 1;
                    messages.push(Message::user(
                        "You returned an empty response. Continue implementing the task.",
                    ));
                    continue;
                }
                if contains_malformed_tool_markup(&outcome.content)
                    && text_nudges < MAX_TEXT_NUDGES
                {
                    text_nudges += 1;
                    messages.push(Message::user(
                        "You wrote a tool call as markup inside your text instead of \
                         using the structured tool-call protocol. Re-issue it as a \
                         real tool call.",
                    ));
                    continue;
                }
                if plan::looks_like_explanation(&outcome.content)
                    && text_nudges < MAX_TEXT_NUDGES
                {
                    text_nudges += 1;
                    messages.push(Message::user(
                        "Do not describe the work — do it with tool calls.",
                    ));
                    continue;
                }
                // A text answer after doing work ends the task.
                break;
            }

            let batch = dispatch_tool_calls(
                registry,
                ctx,
                Mode::Build,
                &outcome.tool_calls,
                tx,
                diffs,
                &mut messages,
            )
            .await;

            for record in &batch.records {
                recent_results.push(record.status == "success");
                if record.status != "success" {
                    errors += 1;
                }
            }
            if recent_results.len() > ERROR_WINDOW {
                let drop_count = recent_results.len() - ERROR_WINDOW;
                recent_results.drain(..drop_count);
            }
            records.extend(batch.records);

            // 4. Loop detection on the batch signature.
            if batch.signature == last_signature && !batch.signature.is_empty() {
                signature_repeats += 1;
            } else {
                signature_repeats = 0;
                last_signature = batch.signature.clone();
            }
            if signature_repeats + 1 >= LOOP_BREAK_REPEATS {
                warn!(task = task.id, "coder is repeating the same actions; breaking");
                summary = format!(
                    "Task {} stopped early: the Coder kept repeating the same actions.",
                    task.id
                );
                break;
            }
            if signature_repeats + 1 >= LOOP_WARN_REPEATS {
                messages.push(Message::user(
                    "You are repeating the same actions. Change your approach or \
                     finish the task with a summary.",
                ));
            }

            // 5. Blocked commands are a hard stop for the task.
            if batch.any_blocked {
                blocked_count += 1;
                if blocked_count >= MAX_BLOCKED_PER_TASK {
                    summary = format!(
                        "Task {} stopped: multiple commands were BLOCKED. The project \
                         runs under the supervisor — file edits are applied \
                         automatically and no server needs starting.",
                        task.id
                    );
                    break;
                }
            }

            // 6. High error rate warning.
            let recent_errors = recent_results.iter().filter(|ok| !**ok).count();
            if recent_errors >= ERROR_WINDOW_LIMIT && !error_rate_warned {
                error_rate_warned = true;
                messages.push(Message::user(
                    "Most of your recent tool calls failed. Re-read the errors and \
                     adjust before continuing.",
                ));
            }
        }

        Ok(TaskReport {
            summary: one_line(&summary, 200),
            errors,
            records,
        })
    }

    async fn review_phase(
        &self,
        task_reports: &[String],
        files_modified: usize,
        errors: usize,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Option<String> {
        let settings = self.fallback.settings();
        let request = CompletionRequest {
            model: settings.planner_model().to_string(),
            messages: vec![
                Message::system(PLANNER_PROMPT),
                Message::user(review_prompt(task_reports, files_modified, errors)),
            ],
            tools: vec![],
            max_tokens: 512,
            temperature: 0.3,
            stream: true,
        };
        match call_model(&self.planner, &request, tx, ChunkStyle::Silent, cancel).await {
            Ok(outcome) if !outcome.content.trim().is_empty() => {
                Some(strip_task_blocks(&outcome.content))
            }
            _ => None,
        }
    }

    async fn persist(
        &self,
        conversation: &Conversation,
        user_text: &str,
        role: MessageRole,
        content: &str,
    ) -> anyhow::Result<()> {
        let store = self.fallback.store();
        store
            .append_message(NewMessage {
                conversation_id: conversation.id.clone(),
                role: MessageRole::User,
                content: user_text.to_string(),
                tool_calls: None,
                status: MessageStatus::Complete,
            })
            .await?;
        let msg = store
            .append_message(NewMessage {
                conversation_id: conversation.id.clone(),
                role,
                content: content.to_string(),
                tool_calls: None,
                status: MessageStatus::Streaming,
            })
            .await?;
        store.complete_message(&msg.id).await?;
        Ok(())
    }
}

enum PlanPhaseResult {
    Tasks(Vec<CoderTask>),
    PlainResponse(String),
    Fallback,
    Cancelled,
}

struct TaskReport {
    summary: String,
    errors: usize,
    records: Vec<crate::store::ToolCallRecord>,
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<coder_task>(.*?)</coder_task>").expect("coder_task pattern")
    })
}

/// Parse ordered `<coder_task>` blocks out of Planner output.
pub fn parse_coder_tasks(content: &str) -> Vec<CoderTask> {
    block_re()
        .captures_iter(content)
        .enumerate()
        .filter_map(|(i, cap)| {
            let body = &cap[1];
            let description = field(body, "TASK")?;
            if description.is_empty() {
                return None;
            }
            let mut files = split_files(&field(body, "FILES_TO_READ").unwrap_or_default());
            for f in split_files(&field(body, "FILES_TO_CREATE_OR_EDIT").unwrap_or_default()) {
                if !files.contains(&f) {
                    files.push(f);
                }
            }
            Some(CoderTask {
                id: i + 1,
                description,
                relevant_files: files,
                relevant_context: field(body, "CONTEXT").unwrap_or_default(),
            })
        })
        .collect()
}

/// Extract one `NAME:` field from a block body.  The field runs to the next
/// recognized field name or the end of the block.
fn field(body: &str, name: &str) -> Option<String> {
    const FIELDS: &[&str] = &["TASK", "FILES_TO_READ", "FILES_TO_CREATE_OR_EDIT", "CONTEXT"];
    let start = body.find(&format!("{name}:"))? + name.len() + 1;
    let rest = &body[start..];
    let end = FIELDS
        .iter()
        .filter(|f| **f != name)
        .filter_map(|f| rest.find(&format!("{f}:")))
        .min()
        .unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

fn split_files(list: &str) -> Vec<String> {
    list.split([',', '\n'])
        .map(|s| s.trim().trim_start_matches("- ").to_string())
        .filter(|s| !s.is_empty() && *s != "none" && *s != "(none)")
        .collect()
}

/// Remove task blocks from Planner prose shown to the user.
fn strip_task_blocks(content: &str) -> String {
    block_re().replace_all(content, "").trim().to_string()
}

fn one_line(text: &str, cap: usize) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut s: String = joined.chars().take(cap).collect();
    if joined.chars().count() > cap {
        s.push('…');
    }
    s
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PLANNER_OUTPUT: &str = "\
Here is the breakdown.\n\
<coder_task>\n\
TASK: Create package.json with an express dependency\n\
FILES_TO_READ: none\n\
FILES_TO_CREATE_OR_EDIT: package.json\n\
CONTEXT: Use express ^4, name the app health-api\n\
</coder_task>\n\
<coder_task>\n\
TASK: Create server.js with a GET /health endpoint\n\
FILES_TO_READ: package.json\n\
FILES_TO_CREATE_OR_EDIT: server.js\n\
CONTEXT: Listen on process.env.PORT\n\
</coder_task>\n";

    #[test]
    fn blocks_parse_in_order() {
        let tasks = parse_coder_tasks(PLANNER_OUTPUT);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, 1);
        assert!(tasks[0].description.starts_with("Create package.json"));
        assert_eq!(tasks[1].relevant_files, vec!["package.json", "server.js"]);
        assert_eq!(tasks[1].relevant_context, "Listen on process.env.PORT");
    }

    #[test]
    fn files_union_deduplicates() {
        let block = "<coder_task>\nTASK: Touch the server entry file now\nFILES_TO_READ: server.js, util.js\nFILES_TO_CREATE_OR_EDIT: server.js\nCONTEXT: x\n</coder_task>";
        let tasks = parse_coder_tasks(block);
        assert_eq!(tasks[0].relevant_files, vec!["server.js", "util.js"]);
    }

    #[test]
    fn none_placeholder_is_dropped() {
        let block = "<coder_task>\nTASK: Something long enough here\nFILES_TO_READ: none\nFILES_TO_CREATE_OR_EDIT: a.js\nCONTEXT:\n</coder_task>";
        let tasks = parse_coder_tasks(block);
        assert_eq!(tasks[0].relevant_files, vec!["a.js"]);
    }

    #[test]
    fn missing_task_field_skips_block() {
        let block = "<coder_task>\nFILES_TO_READ: a.js\nCONTEXT: x\n</coder_task>";
        assert!(parse_coder_tasks(block).is_empty());
    }

    #[test]
    fn prose_without_blocks_parses_empty() {
        assert!(parse_coder_tasks("I suggest doing things.").is_empty());
    }

    #[test]
    fn strip_removes_blocks_keeps_prose() {
        let cleaned = strip_task_blocks(PLANNER_OUTPUT);
        assert_eq!(cleaned, "Here is the breakdown.");
    }

    #[test]
    fn multiline_context_is_captured() {
        let block = "<coder_task>\nTASK: A sufficiently long description\nCONTEXT: line one\nline two\n</coder_task>";
        let tasks = parse_coder_tasks(block);
        assert_eq!(tasks[0].relevant_context, "line one\nline two");
    }

    #[test]
    fn one_line_flattens_and_caps() {
        assert_eq!(one_line("a\nb   c", 10), "a b c");
        assert_eq!(one_line(&"x".repeat(300), 5).chars().count(), 6);
    }
}
