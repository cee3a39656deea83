// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Conversation history windowing and overflow recovery.

use faber_model::{Message, Role};

use crate::store::{MessageRole, StoredMessage};

/// Verbatim messages kept at the end of the window.
const KEEP_RECENT: usize = 20;
/// Messages kept (beyond the system prompt) after an overflow trim.
const OVERFLOW_KEEP: usize = 4;

/// Convert stored history into model messages under the system prompt.
///
/// When more than [`KEEP_RECENT`] messages exist, older ones collapse into a
/// single system note so the window stays bounded; the last 20 are carried
/// verbatim.  Persisted `tool` transcripts are skipped — their content
/// already lives in the terminal assistant message's tool-call records, and
/// orphaned tool results would violate the wire format.
pub fn build_model_messages(system_prompt: &str, stored: &[StoredMessage]) -> Vec<Message> {
    let mut out = vec![Message::system(system_prompt)];

    let visible: Vec<&StoredMessage> = stored
        .iter()
        .filter(|m| m.role != MessageRole::Tool && !m.content.is_empty())
        .collect();

    let (older, recent) = if visible.len() > KEEP_RECENT {
        visible.split_at(visible.len() - KEEP_RECENT)
    } else {
        (&visible[..0], &visible[..])
    };

    if !older.is_empty() {
        out.push(Message::system(summarize_older(older)));
    }

    for msg in recent {
        let role = match msg.role {
            MessageRole::User => Role::User,
            MessageRole::Assistant | MessageRole::Plan => Role::Assistant,
            MessageRole::System => Role::System,
            MessageRole::Tool => continue,
        };
        out.push(Message {
            role,
            content: faber_model::MessageContent::Text(msg.content.clone()),
        });
    }
    out
}

/// One-paragraph digest of the collapsed prefix.
fn summarize_older(older: &[&StoredMessage]) -> String {
    let user_count = older.iter().filter(|m| m.role == MessageRole::User).count();
    let first_user = older
        .iter()
        .find(|m| m.role == MessageRole::User)
        .map(|m| snippet(&m.content, 160))
        .unwrap_or_default();
    let last_assistant = older
        .iter()
        .rev()
        .find(|m| matches!(m.role, MessageRole::Assistant | MessageRole::Plan))
        .map(|m| snippet(&m.content, 160))
        .unwrap_or_default();

    format!(
        "Earlier conversation history ({} messages, {user_count} from the user) \
         was summarized to fit the context window. It began with: \"{first_user}\". \
         The most recent summarized assistant reply was: \"{last_assistant}\".",
        older.len()
    )
}

fn snippet(text: &str, cap: usize) -> String {
    let mut s: String = text.chars().take(cap).collect();
    if text.chars().count() > cap {
        s.push('…');
    }
    s.replace('\n', " ")
}

/// Recovery from a context-length error: keep the system prompt and the last
/// [`OVERFLOW_KEEP`] messages, with a synthetic note marking the cut.
pub fn trim_for_overflow(messages: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(OVERFLOW_KEEP + 2);
    if let Some(first) = messages.first() {
        if first.role == Role::System {
            out.push(first.clone());
        }
    }
    out.push(Message::system(
        "Note: the conversation context was trimmed because it exceeded the \
         model's context window. Earlier messages are no longer visible.",
    ));

    let body: Vec<&Message> = messages
        .iter()
        .skip(if out.len() == 2 { 1 } else { 0 })
        .collect();
    // Never split a tool-call/result pair: advance past orphaned results.
    let mut start = body.len().saturating_sub(OVERFLOW_KEEP);
    while start < body.len() {
        match &body[start].content {
            faber_model::MessageContent::ToolResult { .. } => start += 1,
            _ => break,
        }
    }
    for msg in &body[start..] {
        out.push((*msg).clone());
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageStatus;
    use chrono::Utc;

    fn stored(role: MessageRole, content: &str) -> StoredMessage {
        StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: "c1".into(),
            role,
            content: content.into(),
            tool_calls: None,
            status: MessageStatus::Complete,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn short_history_is_carried_verbatim() {
        let msgs = vec![
            stored(MessageRole::User, "hello"),
            stored(MessageRole::Assistant, "hi"),
        ];
        let out = build_model_messages("sys", &msgs);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].as_text(), Some("hello"));
    }

    #[test]
    fn long_history_collapses_older_into_note() {
        let mut msgs = Vec::new();
        for i in 0..30 {
            msgs.push(stored(MessageRole::User, &format!("question {i}")));
        }
        let out = build_model_messages("sys", &msgs);
        // system + summary note + last 20
        assert_eq!(out.len(), 22);
        let note = out[1].as_text().unwrap();
        assert!(note.contains("Earlier conversation history"));
        assert!(note.contains("question 0"));
        assert_eq!(out[2].as_text(), Some("question 10"));
    }

    #[test]
    fn tool_transcripts_are_skipped() {
        let msgs = vec![
            stored(MessageRole::User, "do it"),
            stored(MessageRole::Tool, "[tool output]"),
            stored(MessageRole::Assistant, "done"),
        ];
        let out = build_model_messages("sys", &msgs);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|m| m.as_text() != Some("[tool output]")));
    }

    #[test]
    fn plan_role_maps_to_assistant() {
        let msgs = vec![stored(MessageRole::Plan, "1. do x\n2. do y")];
        let out = build_model_messages("sys", &msgs);
        assert_eq!(out[1].role, Role::Assistant);
    }

    #[test]
    fn overflow_trim_keeps_system_and_last_four() {
        let mut msgs = vec![Message::system("sys")];
        for i in 0..10 {
            msgs.push(Message::user(format!("m{i}")));
        }
        let out = trim_for_overflow(&msgs);
        assert_eq!(out[0].as_text(), Some("sys"));
        assert!(out[1].as_text().unwrap().contains("trimmed"));
        assert_eq!(out.len(), 2 + 4);
        assert_eq!(out.last().unwrap().as_text(), Some("m9"));
    }

    #[test]
    fn overflow_trim_skips_orphaned_tool_results() {
        let mut msgs = vec![Message::system("sys")];
        for i in 0..6 {
            msgs.push(Message::user(format!("m{i}")));
        }
        // Orphan result right at the cut line.
        msgs.insert(4, Message::tool_result("c9", "orphan"));
        let out = trim_for_overflow(&msgs);
        assert!(out
            .iter()
            .all(|m| !matches!(&m.content, faber_model::MessageContent::ToolResult { .. })
                || m.as_text() != Some("orphan")));
    }
}
