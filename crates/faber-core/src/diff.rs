// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Unified diffs for files touched during a turn.
//!
//! The session tracker captures a file's pre-image lazily on the first
//! mutating tool call that touches it, and the post-image after the call
//! succeeds; at end of turn the aggregated diffs are emitted as one `diff`
//! chunk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use similar::TextDiff;

use crate::chunk::FileDiff;

/// Lines of context around each hunk.
const CONTEXT_LINES: usize = 3;
/// Above this, a real diff is replaced by a summary hunk.
const MAX_DIFF_INPUT_LINES: usize = 2000;
/// Emitted diff text is capped at this many lines.
const MAX_DIFF_OUTPUT_LINES: usize = 200;

/// Standard unified diff with three context lines.
///
/// New files diff against `/dev/null`, deletions diff to `/dev/null`, and
/// equal inputs produce the empty string.  Oversized inputs fall back to a
/// one-hunk summary; oversized output is truncated with a marker.
pub fn generate_unified_diff(path: &str, before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }

    let before_lines = before.lines().count();
    let after_lines = after.lines().count();
    if before_lines > MAX_DIFF_INPUT_LINES || after_lines > MAX_DIFF_INPUT_LINES {
        return format!(
            "--- a/{path}\n+++ b/{path}\n@@ file too large for a line diff @@\n-{before_lines} lines\n+{after_lines} lines\n"
        );
    }

    let old_header = if before.is_empty() {
        "/dev/null".to_string()
    } else {
        format!("a/{path}")
    };
    let new_header = if after.is_empty() {
        "/dev/null".to_string()
    } else {
        format!("b/{path}")
    };

    let diff = TextDiff::from_lines(before, after);
    let text = diff
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&old_header, &new_header)
        .to_string();

    let line_count = text.lines().count();
    if line_count > MAX_DIFF_OUTPUT_LINES {
        let kept: Vec<&str> = text.lines().take(MAX_DIFF_OUTPUT_LINES).collect();
        format!(
            "{}\n... [diff truncated: {} more lines]\n",
            kept.join("\n"),
            line_count - MAX_DIFF_OUTPUT_LINES
        )
    } else {
        text
    }
}

#[derive(Debug, Clone)]
struct FileDelta {
    /// `None` means the file did not exist when first touched.
    before: Option<String>,
    after: Option<String>,
    rel_path: String,
}

/// Per-turn map of touched files.
#[derive(Debug, Default)]
pub struct SessionDiffTracker {
    files: HashMap<PathBuf, FileDelta>,
}

impl SessionDiffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the pre-image the first time `abs_path` is touched this turn.
    /// Later touches keep the original pre-image so the final diff spans the
    /// whole turn.
    pub fn capture_before(&mut self, abs_path: &Path, rel_path: &str) {
        if self.files.contains_key(abs_path) {
            return;
        }
        let before = std::fs::read_to_string(abs_path).ok();
        self.files.insert(
            abs_path.to_path_buf(),
            FileDelta {
                before,
                after: None,
                rel_path: rel_path.to_string(),
            },
        );
    }

    /// Record the post-image after a successful mutation.
    pub fn capture_after(&mut self, abs_path: &Path) {
        if let Some(delta) = self.files.get_mut(abs_path) {
            delta.after = std::fs::read_to_string(abs_path).ok();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths (relative) with an observed change.
    pub fn modified_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .values()
            .filter(|d| d.before != d.after)
            .map(|d| d.rel_path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Aggregate diffs for the turn, ready for the `diff` chunk.
    pub fn into_diffs(self) -> Vec<FileDiff> {
        let mut out: Vec<FileDiff> = self
            .files
            .into_values()
            .filter_map(|d| {
                let before = d.before.unwrap_or_default();
                let after = d.after.unwrap_or_default();
                let diff = generate_unified_diff(&d.rel_path, &before, &after);
                if diff.is_empty() {
                    None
                } else {
                    Some(FileDiff {
                        path: d.rel_path,
                        diff,
                    })
                }
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
