// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Path policy and command block-list.
//!
//! The sandbox is hygiene against a confused model, not a security boundary:
//! it keeps file operations inside the project directory and refuses the
//! commands that would fight the project supervisor (dev servers, process
//! management).

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Resolve a model-supplied path against the working directory.
///
/// Relative paths are joined to `working_dir` and lexically normalized
/// (`.` / `..` components collapsed).  When `sandboxed` is set, the deepest
/// existing ancestor is canonicalized so symlinks cannot escape, and the
/// result must have the canonical working directory as a prefix — otherwise
/// the operation fails with a `Path … is outside the project directory`
/// message the model sees verbatim.
pub fn resolve_path(
    working_dir: &Path,
    requested: &str,
    sandboxed: bool,
) -> Result<PathBuf, String> {
    let root = working_dir
        .canonicalize()
        .map_err(|e| format!("working directory unavailable: {e}"))?;

    let raw = Path::new(requested);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        root.join(raw)
    };
    let normalized = lexical_normalize(&joined);

    if sandboxed {
        let resolved = canonicalize_existing_prefix(&normalized);
        if !resolved.starts_with(&root) {
            return Err(format!(
                "Path '{requested}' is outside the project directory"
            ));
        }
    }

    Ok(normalized)
}

/// Collapse `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// non-existing tail.  Needed because targets of `write_file` may not exist
/// yet, while symlinked ancestors still must resolve.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        if let Ok(canon) = existing.canonicalize() {
            let mut result = canon;
            for part in tail.iter().rev() {
                result.push(part);
            }
            return result;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Patterns for commands the executor refuses.  Dev-server starters are
/// blocked because the project already runs under the supervisor and reloads
/// automatically; process-management tools are blocked because they would
/// fight the supervisor's ownership of the child.
fn blocked_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bnpm\s+(run\s+)?(dev|start|serve|preview)\b",
            r"(?i)\b(yarn|pnpm)\s+(run\s+)?(dev|start|serve|preview)\b",
            r"(?i)\bnpx\s+(vite|next|nuxt|remix)\b(\s+(dev|start))?",
            r"(?i)\bnode\s+(\./)?server/(index|main|app)(\.[cm]?js)?\b",
            r"(?i)\b(kill|pkill|killall|fuser)\b",
            r"(?i)\blsof\s+-i\s*:",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("blocked-command pattern"))
        .collect()
    })
}

/// Returns the refusal message when `command` matches the block-list,
/// `None` when it is allowed.
pub fn blocked_command_reason(command: &str) -> Option<String> {
    for pat in blocked_patterns() {
        if pat.is_match(command) {
            return Some(format!(
                "BLOCKED: '{command}' was not run. The project already runs under the \
                 runtime supervisor, which starts the dev server and reloads on file \
                 changes automatically. Do not start servers or kill processes — just \
                 edit the files and the running project picks the changes up."
            ));
        }
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
