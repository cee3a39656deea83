// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Collaborator contracts consumed by the loops.
//!
//! The engine never owns persistence: conversations, messages and settings
//! live behind [`Persistence`].  [`MemoryStore`] is the in-process
//! implementation used by tests and by embedded callers that do not need
//! durability.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use faber_config::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Plan,
    Tool,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Complete,
}

/// Result cap stored per tool call; the full result went to the model
/// already, persistence only keeps enough for the UI transcript.
const RECORD_RESULT_CAP: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    /// `success` or `error`.
    pub status: String,
    pub result: String,
}

impl ToolCallRecord {
    pub fn new(name: &str, args: &Value, success: bool, result: &str) -> Self {
        let mut result = result.to_string();
        if result.len() > RECORD_RESULT_CAP {
            let cut = result
                .char_indices()
                .take_while(|(i, _)| *i < RECORD_RESULT_CAP)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(RECORD_RESULT_CAP);
            result.truncate(cut);
            result.push('…');
        }
        Self {
            name: name.to_string(),
            args: args.clone(),
            status: if success { "success" } else { "error" }.to_string(),
            result,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub mode: Mode,
    /// Project directory this conversation builds in; `None` means the agent
    /// has no sandbox and must refuse file mutation.
    pub project_path: Option<PathBuf>,
    /// Owning principal; ownership checks live in the auth collaborator.
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    pub status: MessageStatus,
}

/// Persistence collaborator.  Messages are returned ordered by `created_at`
/// ascending; one conversation exists per `(owner, project_path)` — enforced
/// by the implementation, not here.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn conversation(&self, id: &str) -> anyhow::Result<Option<Conversation>>;
    async fn messages(&self, conversation_id: &str) -> anyhow::Result<Vec<StoredMessage>>;
    async fn append_message(&self, msg: NewMessage) -> anyhow::Result<StoredMessage>;
    /// The only permitted post-creation update: `streaming → complete`.
    async fn complete_message(&self, id: &str) -> anyhow::Result<()>;
    async fn set_conversation_title(&self, id: &str, title: &str) -> anyhow::Result<()>;
}

/// Optional remote-file collaborator (used when the corresponding capability
/// tools are enabled).  The engine treats all ids and tokens as opaque.
#[async_trait]
pub trait RemoteFileClient: Send + Sync {
    async fn verify_token(&self) -> anyhow::Result<bool>;
    async fn list_repls(&self, search: Option<&str>) -> anyhow::Result<Vec<String>>;
    /// Opaque metadata blob for one repl; `None` when the id is unknown.
    async fn get_repl_by_id(&self, repl_id: &str) -> anyhow::Result<Option<String>>;
    async fn read_repl_file(&self, repl_id: &str, path: &str) -> anyhow::Result<String>;
    async fn write_repl_file(&self, repl_id: &str, path: &str, content: &str)
        -> anyhow::Result<()>;
    async fn list_repl_files(&self, repl_id: &str) -> anyhow::Result<Vec<String>>;
    async fn delete_repl_file(&self, repl_id: &str, path: &str) -> anyhow::Result<()>;
}

/// In-memory [`Persistence`] used by tests and embedded callers.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation (tests).
    pub fn insert_conversation(&self, conversation: Conversation) {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation);
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn conversation(&self, id: &str) -> anyhow::Result<Option<Conversation>> {
        Ok(self.conversations.lock().unwrap().get(id).cloned())
    }

    async fn messages(&self, conversation_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let mut msgs: Vec<StoredMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        msgs.sort_by_key(|m| m.created_at);
        Ok(msgs)
    }

    async fn append_message(&self, msg: NewMessage) -> anyhow::Result<StoredMessage> {
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: msg.conversation_id,
            role: msg.role,
            content: msg.content,
            tool_calls: msg.tool_calls,
            status: msg.status,
            created_at: Utc::now(),
        };
        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn complete_message(&self, id: &str) -> anyhow::Result<()> {
        let mut messages = self.messages.lock().unwrap();
        match messages.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.status = MessageStatus::Complete;
                Ok(())
            }
            None => anyhow::bail!("no message '{id}'"),
        }
    }

    async fn set_conversation_title(&self, id: &str, title: &str) -> anyhow::Result<()> {
        let mut conversations = self.conversations.lock().unwrap();
        match conversations.get_mut(id) {
            Some(c) => {
                c.title = Some(title.to_string());
                Ok(())
            }
            None => anyhow::bail!("no conversation '{id}'"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
