// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The single-model agent loop.
//!
//! One call to [`SingleAgent::run_turn`] processes one user message: it
//! assembles context, iterates model calls and tool executions up to the
//! iteration ceiling, and streams typed chunks to the subscriber.  All
//! failure paths end with a persisted message and a `done` chunk — the
//! subscriber never hangs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use faber_config::{Mode, Settings};
use faber_model::{CompletionRequest, Message, ModelProvider, ToolSchema};
use faber_tools::{
    standard_registry, CheckpointStore, ProjectRuntime, TaskStore, ToolContext, ToolRegistry,
};

use crate::chunk::StreamChunk;
use crate::diff::SessionDiffTracker;
use crate::history::{build_model_messages, trim_for_overflow};
use crate::plan;
use crate::prompts::compose_system_prompt;
use crate::store::{Conversation, MessageRole, MessageStatus, NewMessage, Persistence};
use crate::turn::{
    call_model, command_output_callback, contains_malformed_tool_markup, dispatch_tool_calls,
    extract_tool_call_from_prose, ChunkStyle, ModelCallError,
};

/// Iterations allowed to return neither content nor tool calls before the
/// turn is abandoned.
const MAX_EMPTY_ITERATIONS: u32 = 3;
/// Build-mode "use the tools" nudges per turn.
const MAX_PROSE_NUDGES: u32 = 3;
/// "DO NOT STOP" continuations while tasks remain pending.
const MAX_CONTINUE_NUDGES: u32 = 2;
/// Consecutive error-only iterations before the approach nudge.
const CONSECUTIVE_ERROR_NUDGE: u32 = 5;
/// Total error recoveries before the forced wrap-up.
const MAX_ERROR_RECOVERIES: u32 = 8;
/// Iterations without a `task_list` call before the reminder.
const TASK_REMINDER_AFTER: u32 = 2;
/// Tool calls required before the post-turn review pass fires.
const REVIEW_MIN_TOOL_CALLS: usize = 3;

const PAUSED_SUFFIX: &str = "Agent paused due to error. Send any message to resume.";

/// Starts project subprocesses on the loop's behalf.  Implemented by the
/// supervisor adapter in the facade crate so the core stays testable
/// without real processes.
#[async_trait]
pub trait ProjectLauncher: Send + Sync {
    /// Start the project if it is not already running.  `Ok(port)` on
    /// success (including already-running), `Err(reason)` otherwise.
    async fn ensure_started(&self, project_dir: &Path) -> Result<u16, String>;
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub user_text: String,
}

pub struct SingleAgent {
    store: Arc<dyn Persistence>,
    model: Arc<dyn ModelProvider>,
    /// Low-temperature model for the post-turn review; defaults to `model`.
    review_model: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    runtime: Option<Arc<dyn ProjectRuntime>>,
    launcher: Option<Arc<dyn ProjectLauncher>>,
    settings: Settings,
}

impl SingleAgent {
    pub fn new(
        store: Arc<dyn Persistence>,
        model: Arc<dyn ModelProvider>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            review_model: Arc::clone(&model),
            model,
            registry: Arc::new(standard_registry()),
            runtime: None,
            launcher: None,
            settings,
        }
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn ProjectRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProjectLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_review_model(mut self, model: Arc<dyn ModelProvider>) -> Self {
        self.review_model = model;
        self
    }

    pub(crate) fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    pub(crate) fn runtime(&self) -> Option<Arc<dyn ProjectRuntime>> {
        self.runtime.clone()
    }

    /// Run one turn.  Chunks stream through `tx`; dropping `cancel`'s sender
    /// (or sending on it) aborts at the next suspension point.
    pub async fn run_turn(
        &self,
        req: TurnRequest,
        tx: mpsc::Sender<StreamChunk>,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let conversation = match self.store.conversation(&req.conversation_id).await? {
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

        let result = self
            .run_turn_inner(&conversation, &req, &tx, &mut cancel)
            .await;

        if let Err(e) = &result {
            warn!(conversation = %conversation.id, "turn failed: {e:#}");
            let _ = tx
                .send(StreamChunk::Error {
                    content: format!("{e:#}"),
                })
                .await;
            let _ = self
                .persist_terminal(&conversation, MessageRole::Assistant, PAUSED_SUFFIX, vec![])
                .await;
        }
        let _ = tx.send(StreamChunk::Done).await;
        Ok(())
    }

    async fn run_turn_inner(
        &self,
        conversation: &Conversation,
        req: &TurnRequest,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let mode = conversation.mode;
        let project = conversation.project_path.clone();
        let max_iterations = self.settings.limits.max_iterations;

        // 1. Persist the user message; title the conversation on first use.
        let prior = self.store.messages(&conversation.id).await?;
        if prior.is_empty() && conversation.title.is_none() {
            let _ = self
                .store
                .set_conversation_title(&conversation.id, &derive_title(&req.user_text))
                .await;
        }
        self.store
            .append_message(NewMessage {
                conversation_id: conversation.id.clone(),
                role: MessageRole::User,
                content: req.user_text.clone(),
                tool_calls: None,
                status: MessageStatus::Complete,
            })
            .await?;

        // 2–3. System prompt and windowed history.
        let system_prompt = compose_system_prompt(mode, project.as_deref(), false);
        let mut messages = build_model_messages(&system_prompt, &prior);
        messages.push(Message::user(&req.user_text));

        // 4. Plan approval → materialize tasks + pre-build checkpoint.
        let task_store = project.as_deref().map(TaskStore::new);
        if mode == Mode::Build {
            if let (Some(plan_body), Some(store), Some(dir)) = (
                plan::extract_approved_plan(&req.user_text),
                &task_store,
                project.as_deref(),
            ) {
                let steps = plan::extract_steps(plan_body);
                if !steps.is_empty() {
                    let tasks = store.create(steps)?;
                    let _ = tx.send(StreamChunk::Tasks { tasks }).await;
                    match CheckpointStore::new(dir).create("pre-build") {
                        Ok(m) => debug!(checkpoint = %m.id, "pre-build checkpoint"),
                        Err(e) => warn!("pre-build checkpoint failed: {e:#}"),
                    }
                }
            }
        }

        // Tooling for this turn.  Without a linked project there is no
        // sandbox: the turn runs tool-free and the system prompt says why.
        let tools_enabled = project.is_some();
        let ctx = self.build_tool_context(project.as_deref(), tx);
        let schemas: Vec<ToolSchema> = if !tools_enabled {
            vec![]
        } else if mode == Mode::Plan {
            to_model_schemas(self.registry.read_only_schemas())
        } else {
            to_model_schemas(self.registry.schemas())
        };

        // 5. The loop.
        let mut diffs = SessionDiffTracker::new();
        let mut records = Vec::new();
        let mut final_content = String::new();
        let mut empty_streak: u32 = 0;
        let mut prose_nudges: u32 = 0;
        let mut continue_nudges: u32 = 0;
        let mut consecutive_error_iters: u32 = 0;
        let mut total_recoveries: u32 = 0;
        let mut iters_since_task_tool: u32 = 0;
        let mut trimmed_once = false;
        let mut force_wrap = false;
        let mut iteration: u32 = 0;
        let mut turn_failed: Option<String> = None;

        loop {
            iteration += 1;
            if iteration > max_iterations {
                final_content.push_str(
                    "\n\nReached the iteration limit for this turn. Progress so far \
                     has been saved; send another message to continue.",
                );
                break;
            }

            let phase = if iteration == 1 { "thinking" } else { "working" };
            let _ = tx
                .send(StreamChunk::IterationStatus {
                    iteration,
                    max_iterations,
                    phase: phase.to_string(),
                })
                .await;

            // Task-list reminder when the model has gone quiet on progress.
            if let Some(store) = &task_store {
                if store.exists() && iters_since_task_tool >= TASK_REMINDER_AFTER {
                    if let Some(next) = store
                        .load()
                        .iter()
                        .find(|t| t.status == faber_tools::TaskStatus::InProgress)
                    {
                        messages.push(Message::system(format!(
                            "Reminder: when task '{}' is finished, call \
                             task_list(action=\"update\", id=\"{}\", status=\"completed\") \
                             before moving on.",
                            next.title, next.id
                        )));
                        iters_since_task_tool = 0;
                    }
                }
            }

            if force_wrap {
                messages.push(Message::user(
                    "Too many tool errors occurred. Stop working now and summarize \
                     what was completed and what still fails. Do not call any more tools.",
                ));
            }

            let request = CompletionRequest {
                model: self.settings.model_name.clone(),
                messages: messages.clone(),
                tools: if force_wrap { vec![] } else { schemas.clone() },
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
                stream: true,
            };

            let outcome = match call_model(&self.model, &request, tx, ChunkStyle::Content, cancel)
                .await
            {
                Ok(o) => o,
                Err(ModelCallError::Overflow) => {
                    if trimmed_once {
                        turn_failed =
                            Some("the conversation no longer fits the model context".into());
                        break;
                    }
                    trimmed_once = true;
                    messages = trim_for_overflow(&messages);
                    let _ = tx
                        .send(StreamChunk::IterationStatus {
                            iteration,
                            max_iterations,
                            phase: "Context too long, trimming history and retrying...".into(),
                        })
                        .await;
                    continue;
                }
                Err(ModelCallError::Cancelled) => return Ok(()),
                Err(ModelCallError::Fatal(msg)) => {
                    turn_failed = Some(msg);
                    break;
                }
            };

            let mut tool_calls = outcome.tool_calls;
            if !outcome.content.is_empty() {
                final_content = outcome.content.clone();
                messages.push(Message::assistant(&outcome.content));
            }

            // d. Rescue a tool call written as JSON prose — only when the
            // model emitted no structured calls in the same message.
            if tool_calls.is_empty() && tools_enabled {
                if let Some(rescued) =
                    extract_tool_call_from_prose(&outcome.content, &self.registry)
                {
                    debug!(tool = %rescued.name, "rescued tool call from prose");
                    tool_calls.push(rescued);
                }
            }

            if tool_calls.is_empty() && outcome.content.is_empty() {
                empty_streak += 1;
                if empty_streak >= MAX_EMPTY_ITERATIONS {
                    turn_failed = Some("the model returned empty responses".into());
                    break;
                }
                messages.push(Message::user(
                    "You returned an empty response. Continue with your next action \
                     or summarize your progress.",
                ));
                continue;
            }
            empty_streak = 0;

            if force_wrap {
                break;
            }

            if !tool_calls.is_empty() {
                let batch = dispatch_tool_calls(
                    &self.registry,
                    &ctx,
                    mode,
                    &tool_calls,
                    tx,
                    &mut diffs,
                    &mut messages,
                )
                .await;
                records.extend(batch.records);

                if batch.called_task_list {
                    iters_since_task_tool = 0;
                } else {
                    iters_since_task_tool += 1;
                }

                // g. Error recovery bookkeeping.
                if batch.any_error {
                    total_recoveries += 1;
                    consecutive_error_iters += 1;
                    if total_recoveries >= MAX_ERROR_RECOVERIES {
                        force_wrap = true;
                    } else if consecutive_error_iters >= CONSECUTIVE_ERROR_NUDGE {
                        messages.push(Message::user(
                            "The last several tool calls all failed. Step back and \
                             try a different approach instead of repeating the same \
                             operation.",
                        ));
                        consecutive_error_iters = 0;
                    }
                } else {
                    consecutive_error_iters = 0;
                }

                // Tool results are in; go around regardless of finish reason.
                continue;
            }

            iters_since_task_tool += 1;

            // Tool-call markup in the text stream that the rescue parser
            // could not recover: correct the format instead of accepting it
            // as a terminal answer.
            if tools_enabled
                && contains_malformed_tool_markup(&outcome.content)
                && prose_nudges < MAX_PROSE_NUDGES
            {
                prose_nudges += 1;
                messages.push(Message::user(
                    "You wrote a tool call as markup inside your text instead of \
                     using the structured tool-call protocol. Do not put tool calls \
                     in the text — re-issue it as a real tool call.",
                ));
                continue;
            }

            // f. Pure prose in build mode that reads as an explanation.
            if mode == Mode::Build
                && tools_enabled
                && plan::looks_like_explanation(&outcome.content)
                && prose_nudges < MAX_PROSE_NUDGES
            {
                prose_nudges += 1;
                messages.push(Message::user(
                    "Do not describe the changes — make them. Use the tools to read \
                     and modify the project files directly.",
                ));
                continue;
            }

            // 6. Don't stop while the task list still has open entries.
            if mode == Mode::Build {
                if let Some(store) = &task_store {
                    if store.exists() && store.has_pending() && continue_nudges < MAX_CONTINUE_NUDGES
                    {
                        continue_nudges += 1;
                        messages.push(Message::user(
                            "DO NOT STOP. The task list still has unfinished tasks. \
                             Continue with the next task and mark each one completed \
                             as you go.",
                        ));
                        continue;
                    }
                }
            }

            // Terminal message.
            break;
        }

        if let Some(reason) = turn_failed {
            let _ = tx
                .send(StreamChunk::Error {
                    content: format!("The agent hit a problem: {reason}."),
                })
                .await;
            let content = if final_content.is_empty() {
                PAUSED_SUFFIX.to_string()
            } else {
                format!("{final_content}\n\n{PAUSED_SUFFIX}")
            };
            self.persist_terminal(conversation, MessageRole::Assistant, &content, records)
                .await?;
            return Ok(());
        }

        // 7. Post-build checkpoint when files changed.
        let modified = diffs.modified_paths();
        if mode == Mode::Build && !modified.is_empty() {
            if let Some(dir) = project.as_deref() {
                if let Err(e) = CheckpointStore::new(dir).create("post-build") {
                    warn!("post-build checkpoint failed: {e:#}");
                }
            }
        }

        // 8. Session diffs, then the optional review pass.
        let tool_call_count = records.len();
        let diff_list = diffs.into_diffs();
        if !diff_list.is_empty() {
            let _ = tx.send(StreamChunk::Diff { diffs: diff_list }).await;
        }
        if mode == Mode::Build && !modified.is_empty() && tool_call_count >= REVIEW_MIN_TOOL_CALLS {
            if let Some(review) = self
                .review_pass(&req.user_text, &modified, tx, cancel)
                .await
            {
                let _ = tx.send(StreamChunk::Review { content: review }).await;
            }
        }

        // Auto-start the project after a file-mutating build turn.
        if mode == Mode::Build && !modified.is_empty() {
            if let (Some(launcher), Some(dir)) = (&self.launcher, project.as_deref()) {
                match launcher.ensure_started(dir).await {
                    Ok(port) => {
                        let _ = tx.send(StreamChunk::AutoStart { port }).await;
                    }
                    Err(reason) => {
                        let _ = tx
                            .send(StreamChunk::AutoStartError { content: reason })
                            .await;
                    }
                }
            }
        }

        // 9. Plan detection in plan mode.
        let is_plan = mode == Mode::Plan && plan::detect_plan(&final_content);
        if is_plan {
            let _ = tx
                .send(StreamChunk::Plan {
                    content: final_content.clone(),
                })
                .await;
        }

        // 10. Terminal persistence.
        let role = if is_plan {
            MessageRole::Plan
        } else {
            MessageRole::Assistant
        };
        self.persist_terminal(conversation, role, &final_content, records)
            .await?;
        Ok(())
    }

    /// One non-streaming, low-temperature call reviewing the turn's changes.
    async fn review_pass(
        &self,
        user_text: &str,
        modified: &[String],
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Option<String> {
        let prompt = format!(
            "You just finished a coding task: \"{}\". These files were \
             modified: {}. In 2-4 sentences, review whether the changes \
             plausibly complete the task and point out anything the user \
             should double-check. Do not call tools.",
            derive_title(user_text),
            modified.join(", ")
        );
        let request = CompletionRequest {
            model: self.settings.model_name.clone(),
            messages: vec![
                Message::system("You are a concise code-review assistant."),
                Message::user(prompt),
            ],
            tools: vec![],
            max_tokens: 512,
            temperature: 0.2,
            stream: true,
        };
        match call_model(&self.review_model, &request, tx, ChunkStyle::Silent, cancel).await {
            Ok(outcome) if !outcome.content.is_empty() => Some(outcome.content),
            _ => None,
        }
    }

    fn build_tool_context(
        &self,
        project: Option<&Path>,
        tx: &mpsc::Sender<StreamChunk>,
    ) -> ToolContext {
        let working_dir: PathBuf = project
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut ctx = ToolContext::new(working_dir);
        ctx.sandboxed = self.settings.sandbox.enabled;
        ctx.runtime = self.runtime.clone();
        ctx.on_command_output = Some(command_output_callback(tx));
        ctx
    }

    async fn persist_terminal(
        &self,
        conversation: &Conversation,
        role: MessageRole,
        content: &str,
        records: Vec<crate::store::ToolCallRecord>,
    ) -> anyhow::Result<()> {
        let msg = self
            .store
            .append_message(NewMessage {
                conversation_id: conversation.id.clone(),
                role,
                content: content.to_string(),
                tool_calls: if records.is_empty() {
                    None
                } else {
                    Some(records)
                },
                status: MessageStatus::Streaming,
            })
            .await?;
        self.store.complete_message(&msg.id).await?;
        Ok(())
    }
}

fn to_model_schemas(schemas: Vec<faber_tools::ToolSchema>) -> Vec<ToolSchema> {
    schemas
        .into_iter()
        .map(|s| ToolSchema {
            name: s.name,
            description: s.description,
            parameters: s.parameters,
        })
        .collect()
}

/// Conversation title from the first user message: first words, bounded.
fn derive_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().take(8).collect();
    let mut title = words.join(" ");
    if title.chars().count() > 60 {
        title = title.chars().take(60).collect::<String>().trim_end().to_string();
    }
    if title.is_empty() {
        title = "New conversation".to_string();
    }
    title
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_takes_leading_words() {
        assert_eq!(derive_title("Change hello to world in a.txt"), "Change hello to world in a.txt");
        assert_eq!(derive_title(""), "New conversation");
    }

    #[test]
    fn title_is_bounded() {
        let long = "word ".repeat(40);
        assert!(derive_title(&long).chars().count() <= 60);
    }
}
