// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Loop-level tests driven by scripted mock providers: exact model event
//! sequences, real tool execution against temp directories, no network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use faber_config::{Mode, Settings};
use faber_model::mock::{FailingProvider, ScriptedMockProvider};
use faber_model::ModelProvider;
use faber_tools::TaskStatus;

use crate::dual::DualAgent;
use crate::single::{SingleAgent, TurnRequest};
use crate::store::{Conversation, MemoryStore, MessageRole, Persistence};
use crate::StreamChunk;

fn conversation(id: &str, mode: Mode, project: Option<&Path>) -> Conversation {
    Conversation {
        id: id.into(),
        title: None,
        mode,
        project_path: project.map(Path::to_path_buf),
        owner: "u1".into(),
    }
}

fn agent(store: Arc<MemoryStore>, model: Arc<dyn ModelProvider>) -> SingleAgent {
    SingleAgent::new(store, model, Settings::default())
}

/// Run one turn to completion and return every chunk emitted.
async fn run_and_collect(
    agent: Arc<SingleAgent>,
    conversation_id: &str,
    user_text: &str,
) -> Vec<StreamChunk> {
    let (tx, mut rx) = mpsc::channel(256);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let req = TurnRequest {
        conversation_id: conversation_id.into(),
        user_text: user_text.into(),
    };
    let handle = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.run_turn(req, tx, cancel_rx).await })
    };

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    handle.await.unwrap().unwrap();
    chunks
}

fn tool_end_chunks(chunks: &[StreamChunk]) -> Vec<(&str, &str, &str)> {
    chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::ToolCall {
                tool_name,
                tool_call_id,
                tool_result: Some(result),
                ..
            } => Some((tool_name.as_str(), tool_call_id.as_str(), result.as_str())),
            _ => None,
        })
        .collect()
}

// ── Scenario: read then edit ──────────────────────────────────────────────────

#[tokio::test]
async fn read_then_edit_turn() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_round("call_1", "read_file", r#"{"path": "a.txt"}"#),
        ScriptedMockProvider::tool_call_round(
            "call_2",
            "edit_file",
            r#"{"path": "a.txt", "old_string": "hello", "new_string": "world"}"#,
        ),
        ScriptedMockProvider::text_round("Done. a.txt now says world."),
    ]));
    let agent = Arc::new(agent(Arc::clone(&store), model));

    let chunks = run_and_collect(agent, "c1", "Change hello to world in a.txt").await;

    // The file changed.
    assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "world");

    // Tool sequence read_file → edit_file, each with paired start/end chunks.
    let ends = tool_end_chunks(&chunks);
    assert_eq!(ends[0].0, "read_file");
    assert_eq!(ends[1].0, "edit_file");

    // The final diff chunk shows the change.
    let diff = chunks
        .iter()
        .find_map(|c| match c {
            StreamChunk::Diff { diffs } => Some(diffs),
            _ => None,
        })
        .expect("diff chunk");
    assert!(diff[0].diff.contains("-hello"));
    assert!(diff[0].diff.contains("+world"));

    // Terminal done chunk.
    assert!(matches!(chunks.last(), Some(StreamChunk::Done)));

    // The persisted terminal message carries the tool-call log.
    let msgs = store.messages("c1").await.unwrap();
    let last = msgs.last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert_eq!(last.tool_calls.as_ref().unwrap().len(), 2);
}

// ── Property: chunk pairing and ordering per tool call ───────────────────────

#[tokio::test]
async fn tool_call_chunks_pair_and_order() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_round(
            "cmd_1",
            "execute_command",
            r#"{"command": "echo alpha && echo beta"}"#,
        ),
        ScriptedMockProvider::text_round("Done."),
    ]));
    let agent = Arc::new(agent(Arc::clone(&store), model));
    let chunks = run_and_collect(agent, "c1", "run the echo").await;

    // Exactly one start and one end for cmd_1, in that order, with every
    // command_output chunk between them.
    let mut starts: HashMap<&str, usize> = HashMap::new();
    let mut ends: HashMap<&str, usize> = HashMap::new();
    let mut outputs: Vec<usize> = Vec::new();
    for (i, c) in chunks.iter().enumerate() {
        match c {
            StreamChunk::ToolCall {
                tool_call_id,
                tool_args: Some(_),
                ..
            } => {
                assert!(starts.insert(tool_call_id.as_str(), i).is_none());
            }
            StreamChunk::ToolCall {
                tool_call_id,
                tool_result: Some(_),
                ..
            } => {
                assert!(ends.insert(tool_call_id.as_str(), i).is_none());
            }
            StreamChunk::CommandOutput { tool_call_id, .. } => {
                assert_eq!(tool_call_id, "cmd_1");
                outputs.push(i);
            }
            _ => {}
        }
    }
    let start = starts["cmd_1"];
    let end = ends["cmd_1"];
    assert!(start < end);
    assert!(!outputs.is_empty(), "no command_output chunks streamed");
    for i in outputs {
        assert!(i > start && i < end, "command_output outside start/end window");
    }
}

// ── Scenario: plan approval pipeline ──────────────────────────────────────────

#[tokio::test]
async fn plan_approval_materializes_tasks_and_checkpoint() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("readme.md"), "seed").unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_round(
            "w1",
            "write_file",
            r#"{"path": "package.json", "content": "{\"name\": \"app\"}"}"#,
        ),
        ScriptedMockProvider::tool_call_round(
            "t1",
            "task_list",
            r#"{"action": "update", "id": "task-1", "status": "completed"}"#,
        ),
        ScriptedMockProvider::tool_call_round(
            "w2",
            "write_file",
            r#"{"path": "server.js", "content": "// server"}"#,
        ),
        ScriptedMockProvider::tool_call_round(
            "t2",
            "task_list",
            r#"{"action": "update", "id": "task-2", "status": "completed"}"#,
        ),
        ScriptedMockProvider::text_round("Both files created."),
    ]));
    let agent = Arc::new(agent(Arc::clone(&store), model));

    let chunks = run_and_collect(
        agent,
        "c1",
        "Approved. Please implement the following plan:\n\n1. Create package.json\n2. Create server.js",
    )
    .await;

    // Tasks chunk with 2 entries, first in_progress.
    let first_tasks = chunks
        .iter()
        .find_map(|c| match c {
            StreamChunk::Tasks { tasks } => Some(tasks.clone()),
            _ => None,
        })
        .expect("tasks chunk");
    assert_eq!(first_tasks.len(), 2);
    assert_eq!(first_tasks[0].status, TaskStatus::InProgress);

    // Pre-build checkpoint directory exists.
    let checkpoints = dir.path().join(".checkpoints");
    let has_pre_build = std::fs::read_dir(&checkpoints)
        .unwrap()
        .flatten()
        .any(|e| e.file_name().to_string_lossy().starts_with("cp-pre-build-"));
    assert!(has_pre_build, "no pre-build checkpoint created");

    // Both files written, both tasks completed on disk.
    assert!(dir.path().join("package.json").exists());
    assert!(dir.path().join("server.js").exists());
    let tasks = faber_tools::TaskStore::new(dir.path()).load();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
}

// ── Scenario: blocked command ─────────────────────────────────────────────────

#[tokio::test]
async fn blocked_dev_server_command_is_refused() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_round(
            "x1",
            "execute_command",
            r#"{"command": "npm run dev"}"#,
        ),
        ScriptedMockProvider::text_round("Understood, the supervisor handles it."),
    ]));
    let agent = Arc::new(agent(Arc::clone(&store), model));
    let chunks = run_and_collect(agent, "c1", "Start the dev server").await;

    let ends = tool_end_chunks(&chunks);
    assert_eq!(ends.len(), 1);
    assert!(ends[0].2.contains("BLOCKED"), "{}", ends[0].2);
    let status = chunks.iter().find_map(|c| match c {
        StreamChunk::ToolCall {
            tool_status: Some(s),
            ..
        } => Some(s.clone()),
        _ => None,
    });
    assert_eq!(status.as_deref(), Some("error"));
}

// ── Scenario: context overflow recovery ───────────────────────────────────────

#[tokio::test]
async fn context_overflow_trims_and_retries() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let model = Arc::new(FailingProvider::new(
        "This model's maximum context length is 8192 tokens",
        Some(1),
    ));
    let agent = Arc::new(agent(Arc::clone(&store), model));
    let chunks = run_and_collect(agent, "c1", "keep going").await;

    let trimming_phase = chunks.iter().any(|c| match c {
        StreamChunk::IterationStatus { phase, .. } => phase.contains("trimming"),
        _ => false,
    });
    assert!(trimming_phase, "no trimming phase emitted");

    let content: String = chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert!(content.contains("Recovered"));
    assert!(matches!(chunks.last(), Some(StreamChunk::Done)));
}

#[tokio::test]
async fn repeated_overflow_surfaces_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let model = Arc::new(FailingProvider::new("context length exceeded", None));
    let agent = Arc::new(agent(Arc::clone(&store), model));
    let chunks = run_and_collect(agent, "c1", "hi").await;

    assert!(chunks
        .iter()
        .any(|c| matches!(c, StreamChunk::Error { .. })));
    // The persisted message invites the user to resume.
    let msgs = store.messages("c1").await.unwrap();
    assert!(msgs.last().unwrap().content.contains("Send any message to resume"));
}

// ── Empty responses ───────────────────────────────────────────────────────────

#[tokio::test]
async fn three_empty_responses_stop_the_turn() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let empty_round = || {
        vec![
            faber_model::ResponseEvent::FinishReason("stop".into()),
            faber_model::ResponseEvent::Done,
        ]
    };
    let model = Arc::new(ScriptedMockProvider::new(vec![
        empty_round(),
        empty_round(),
        empty_round(),
    ]));
    let calls = Arc::clone(&model.calls);
    let agent = Arc::new(agent(Arc::clone(&store), model));
    let chunks = run_and_collect(agent, "c1", "hello?").await;

    assert!(chunks
        .iter()
        .any(|c| matches!(c, StreamChunk::Error { .. })));
    assert_eq!(*calls.lock().unwrap(), 3);
}

// ── Plan mode ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plan_mode_emits_plan_chunk_and_plan_role() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Plan, Some(dir.path())));

    let model = Arc::new(ScriptedMockProvider::always_text(
        "Plan:\n1. Create package.json\n2. Create server.js with a /health route",
    ));
    let agent = Arc::new(agent(Arc::clone(&store), model));
    let chunks = run_and_collect(agent, "c1", "Create an Express health endpoint").await;

    let plan = chunks.iter().find_map(|c| match c {
        StreamChunk::Plan { content } => Some(content.clone()),
        _ => None,
    });
    assert!(plan.unwrap().contains("1. Create package.json"));

    let msgs = store.messages("c1").await.unwrap();
    assert_eq!(msgs.last().unwrap().role, MessageRole::Plan);
}

#[tokio::test]
async fn plan_mode_refuses_mutating_tools() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Plan, Some(dir.path())));

    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_round(
            "w1",
            "write_file",
            r#"{"path": "a.txt", "content": "x"}"#,
        ),
        ScriptedMockProvider::text_round("Plan:\n1. First step here\n2. Second step here"),
    ]));
    let agent = Arc::new(agent(Arc::clone(&store), model));
    let chunks = run_and_collect(agent, "c1", "make the file").await;

    let ends = tool_end_chunks(&chunks);
    assert!(ends[0].2.contains("not available in plan mode"));
    assert!(!dir.path().join("a.txt").exists());
}

// ── Dual loop ─────────────────────────────────────────────────────────────────

const PLANNER_TWO_TASKS: &str = "\
<coder_task>\n\
TASK: Create package.json for the health API\n\
FILES_TO_READ: none\n\
FILES_TO_CREATE_OR_EDIT: package.json\n\
CONTEXT: name it health-api\n\
</coder_task>\n";

#[tokio::test]
async fn dual_loop_runs_coder_tasks_and_reviews() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let planner = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::text_round(PLANNER_TWO_TASKS),
        ScriptedMockProvider::text_round(
            "The Coder created package.json as planned. No errors occurred. \
             The project is ready for a server implementation next.",
        ),
    ]));
    let coder = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_round(
            "w1",
            "write_file",
            r#"{"path": "package.json", "content": "{\"name\": \"health-api\"}"}"#,
        ),
        ScriptedMockProvider::text_round("Created package.json."),
    ]));

    let single = SingleAgent::new(
        Arc::clone(&store) as Arc<dyn Persistence>,
        Arc::new(ScriptedMockProvider::always_text("unused")),
        Settings::default(),
    );
    let dual = Arc::new(DualAgent::new(planner, coder, single));

    let (tx, mut rx) = mpsc::channel(256);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let handle = {
        let dual = Arc::clone(&dual);
        tokio::spawn(async move {
            dual.run_turn(
                TurnRequest {
                    conversation_id: "c1".into(),
                    user_text: "approved".into(),
                },
                tx,
                cancel_rx,
            )
            .await
        })
    };
    let mut chunks = Vec::new();
    while let Some(c) = rx.recv().await {
        chunks.push(c);
    }
    handle.await.unwrap().unwrap();

    assert!(dir.path().join("package.json").exists());
    let final_tasks = chunks
        .iter()
        .rev()
        .find_map(|c| match c {
            StreamChunk::Tasks { tasks } => Some(tasks.clone()),
            _ => None,
        })
        .unwrap();
    assert!(final_tasks.iter().all(|t| t.status == TaskStatus::Completed));

    let review: String = chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert!(review.contains("[Planner Review]"), "{review}");
}

#[tokio::test]
async fn dual_coder_loop_detection_breaks_task() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let planner = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::text_round(PLANNER_TWO_TASKS),
        ScriptedMockProvider::text_round("The run hit a repetition guard."),
    ]));
    let same_write = || {
        ScriptedMockProvider::tool_call_round(
            "w",
            "write_file",
            r#"{"path": "x.ts", "content": "export {}"}"#,
        )
    };
    // Identical action three times, then more rounds that must never run.
    let coder = Arc::new(ScriptedMockProvider::new(vec![
        same_write(),
        same_write(),
        same_write(),
        same_write(),
        same_write(),
    ]));
    let coder_calls = Arc::clone(&coder.calls);

    let single = SingleAgent::new(
        Arc::clone(&store) as Arc<dyn Persistence>,
        Arc::new(ScriptedMockProvider::always_text("unused")),
        Settings::default(),
    );
    let dual = Arc::new(DualAgent::new(planner, coder, single));

    let (tx, mut rx) = mpsc::channel(256);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        dual.run_turn(
            TurnRequest {
                conversation_id: "c1".into(),
                user_text: "approved".into(),
            },
            tx,
            cancel_rx,
        )
        .await
    });
    let mut chunks = Vec::new();
    while let Some(c) = rx.recv().await {
        chunks.push(c);
    }
    handle.await.unwrap().unwrap();

    // Broke after the third identical batch; the task is still completed.
    assert_eq!(*coder_calls.lock().unwrap(), 3);
    let tasks = faber_tools::TaskStore::new(dir.path()).load();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
}

#[tokio::test]
async fn dual_falls_back_to_single_agent_on_planner_failure() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_conversation(conversation("c1", Mode::Build, Some(dir.path())));

    let planner = Arc::new(FailingProvider::new("invalid api key", None));
    let coder = Arc::new(ScriptedMockProvider::always_text("unused"));
    let single = SingleAgent::new(
        Arc::clone(&store) as Arc<dyn Persistence>,
        Arc::new(ScriptedMockProvider::always_text("Single agent handled it.")),
        Settings::default(),
    );
    let dual = Arc::new(DualAgent::new(planner, coder, single));

    let (tx, mut rx) = mpsc::channel(256);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        dual.run_turn(
            TurnRequest {
                conversation_id: "c1".into(),
                user_text: "approved, build it".into(),
            },
            tx,
            cancel_rx,
        )
        .await
    });
    let mut chunks = Vec::new();
    while let Some(c) = rx.recv().await {
        chunks.push(c);
    }
    handle.await.unwrap().unwrap();

    let content: String = chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert!(content.contains("Single agent handled it"));
}
