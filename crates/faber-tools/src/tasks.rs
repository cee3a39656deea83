// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSON-file-backed task list, authoritative for UI progress.
//!
//! Stored at `<project>/.agent-tasks.json`.  Invariants: at most one task is
//! `in_progress`; completing a task auto-advances the next `pending`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const TASKS_FILE: &str = ".agent-tasks.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
}

/// Handle on a project's task-list file.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            path: project_dir.join(TASKS_FILE),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the task list; a missing or unreadable file is an empty list.
    pub fn load(&self) -> Vec<Task> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, tasks: &[Task]) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(tasks)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    /// Replace the list with fresh tasks from `titles`.  The first becomes
    /// `in_progress`, the rest `pending`.
    pub fn create(&self, titles: Vec<String>) -> anyhow::Result<Vec<Task>> {
        let tasks: Vec<Task> = titles
            .into_iter()
            .enumerate()
            .map(|(i, title)| Task {
                id: format!("task-{}", i + 1),
                title,
                status: if i == 0 {
                    TaskStatus::InProgress
                } else {
                    TaskStatus::Pending
                },
            })
            .collect();
        self.save(&tasks)?;
        Ok(tasks)
    }

    /// Update one task's status.  Completing a task advances the next
    /// `pending` task to `in_progress`, keeping at most one active.
    pub fn update(&self, id: &str, status: TaskStatus) -> anyhow::Result<Vec<Task>> {
        let mut tasks = self.load();
        let Some(pos) = tasks.iter().position(|t| t.id == id) else {
            anyhow::bail!("no task with id '{id}'");
        };

        if status == TaskStatus::InProgress {
            // Demote any other active task before promoting this one.
            for t in tasks.iter_mut() {
                if t.status == TaskStatus::InProgress {
                    t.status = TaskStatus::Pending;
                }
            }
        }
        tasks[pos].status = status;

        if status == TaskStatus::Completed
            && !tasks.iter().any(|t| t.status == TaskStatus::InProgress)
        {
            if let Some(next) = tasks.iter_mut().find(|t| t.status == TaskStatus::Pending) {
                next.status = TaskStatus::InProgress;
            }
        }

        self.save(&tasks)?;
        Ok(tasks)
    }

    /// True while any task is not yet completed.
    pub fn has_pending(&self) -> bool {
        self.load()
            .iter()
            .any(|t| t.status != TaskStatus::Completed)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
