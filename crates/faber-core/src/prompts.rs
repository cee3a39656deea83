// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt composition and the project context digest.

use std::path::Path;

use faber_config::Mode;
use serde_json::Value;

/// Cap on any single digest section, to keep the prompt bounded.
const SECTION_CAP: usize = 2000;
/// Directory entries listed per level.
const MAX_ENTRIES: usize = 30;
/// Lines of an entry file shown for import context.
const ENTRY_HEAD_LINES: usize = 30;

const BASE_PROMPT: &str = "\
You are an autonomous coding assistant working inside a sandboxed project \
directory. You make changes by calling tools — reading files, writing files, \
running commands — never by describing what the user should do. Work \
incrementally: read before you edit, verify after you change, and keep the \
task list current as you complete steps. File paths are relative to the \
project root. The project runs under a supervisor that restarts and reloads \
it automatically; never start dev servers or kill processes yourself. When \
you are done, summarize what changed in one or two short paragraphs.";

const PLAN_MODE_SECTION: &str = "\
You are in PLAN mode. Do not modify any files or run any commands that \
change state — only read-only tools are available. Investigate the project, \
then reply with a concise numbered plan (one action per step) the user can \
approve. Do not include code in the plan.";

const SELF_MODIFICATION_NOTICE: &str = "\
No project directory is linked to this conversation, so there is no sandbox \
to work in. Do not attempt to create, modify, or delete files; answer \
questions and propose next steps instead.";

const REMOTE_SECTION: &str = "\
Remote file access is available: you can list the user's remote repls and \
read, write, or delete files in them through the remote tools. Always \
verify the target repl before writing.";

/// Compose the system prompt for one turn.
pub fn compose_system_prompt(
    mode: Mode,
    project_dir: Option<&Path>,
    remote_enabled: bool,
) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    match project_dir {
        Some(dir) => {
            let digest = project_digest(dir);
            if !digest.is_empty() {
                prompt.push_str("\n\n# Project context\n");
                prompt.push_str(&digest);
            }
        }
        None => {
            prompt.push_str("\n\n");
            prompt.push_str(SELF_MODIFICATION_NOTICE);
        }
    }

    if mode == Mode::Plan {
        prompt.push_str("\n\n");
        prompt.push_str(PLAN_MODE_SECTION);
    }

    if remote_enabled {
        prompt.push_str("\n\n");
        prompt.push_str(REMOTE_SECTION);
    }

    prompt
}

/// Size-capped text digest of the project: manifest summary, top-level
/// layout, config inventory, source skeleton, and entry-file imports.
pub fn project_digest(dir: &Path) -> String {
    let mut out = String::new();

    if let Some(pkg) = read_package_json(dir) {
        out.push_str("package.json: ");
        out.push_str(&pkg);
        out.push('\n');
    }

    let layout = list_entries(dir);
    if !layout.is_empty() {
        out.push_str(&format!("Top-level entries: {}\n", layout.join(", ")));
    }

    let configs = config_inventory(dir);
    if !configs.is_empty() {
        out.push_str(&format!("Config files: {}\n", configs.join(", ")));
    }

    let src = dir.join("src");
    if src.is_dir() {
        let skeleton = list_entries(&src);
        if !skeleton.is_empty() {
            out.push_str(&format!("src/: {}\n", skeleton.join(", ")));
        }
    }

    if let Some((entry, head)) = entry_file_head(dir) {
        out.push_str(&format!("Head of {entry}:\n{head}\n"));
    }

    cap(&out, SECTION_CAP * 3)
}

fn read_package_json(dir: &Path) -> Option<String> {
    let text = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let pkg: Value = serde_json::from_str(&text).ok()?;
    let name = pkg["name"].as_str().unwrap_or("(unnamed)");
    let scripts: Vec<String> = pkg["scripts"]
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let deps: Vec<String> = pkg["dependencies"]
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let mut summary = format!("name={name}");
    if !scripts.is_empty() {
        summary.push_str(&format!(", scripts=[{}]", scripts.join(", ")));
    }
    if !deps.is_empty() {
        summary.push_str(&format!(", dependencies=[{}]", deps.join(", ")));
    }
    Some(cap(&summary, SECTION_CAP))
}

fn list_entries(dir: &Path) -> Vec<String> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries: Vec<String> = read_dir
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == "node_modules" {
                return None;
            }
            let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
            Some(if is_dir { format!("{name}/") } else { name })
        })
        .collect();
    entries.sort();
    entries.truncate(MAX_ENTRIES);
    entries
}

fn config_inventory(dir: &Path) -> Vec<String> {
    [
        "package.json",
        "tsconfig.json",
        "vite.config.js",
        "vite.config.ts",
        "tailwind.config.js",
        "postcss.config.js",
        "Dockerfile",
        ".env",
        "database.sqlite",
    ]
    .iter()
    .filter(|f| dir.join(f).exists())
    .map(|f| f.to_string())
    .collect()
}

fn entry_file_head(dir: &Path) -> Option<(String, String)> {
    for candidate in ["server.js", "index.js", "src/main.jsx", "src/main.tsx", "main.py", "app.py"] {
        let path = dir.join(candidate);
        if let Ok(text) = std::fs::read_to_string(&path) {
            let head: Vec<&str> = text.lines().take(ENTRY_HEAD_LINES).collect();
            return Some((candidate.to_string(), cap(&head.join("\n"), SECTION_CAP)));
        }
    }
    None
}

fn cap(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .take_while(|(i, _)| *i < max)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(max);
    format!("{}…", &text[..cut])
}

// ── Dual-loop prompts ─────────────────────────────────────────────────────────

pub const PLANNER_PROMPT: &str = "\
You are the Planner of a two-role coding team. You never write code and you \
never call tools. You decompose the user's request into small, ordered tasks \
for the Coder. Every task MUST be emitted as a block of this exact shape:\n\
\n\
<coder_task>\n\
TASK: one-sentence description of what to build or change\n\
FILES_TO_READ: comma-separated files the Coder should read first\n\
FILES_TO_CREATE_OR_EDIT: comma-separated files the Coder will touch\n\
CONTEXT: constraints, interfaces, or decisions the Coder needs\n\
</coder_task>\n\
\n\
Emit the blocks in execution order. Outside the blocks, write at most a \
sentence or two of rationale. If the user is only asking a question or the \
request needs no code changes, reply normally without blocks.";

pub const PLANNER_APPROVAL_NUDGE: &str = "\
The user has approved the plan. You must now emit <coder_task> blocks for \
every step so the Coder can implement them. Do not reply with prose only.";

pub const PLANNER_DETAIL_NUDGE: &str = "\
Your task descriptions are too thin for the Coder to act on. Re-emit the \
<coder_task> blocks with specific TASK sentences, concrete file lists, and \
the CONTEXT the Coder needs.";

pub const PLANNER_EMPTY_NUDGE: &str = "\
You emitted no <coder_task> blocks, but this request requires code changes. \
Re-read the request and emit the task blocks now.";

/// Prompt for the Coder working one task.
pub fn coder_task_prompt(
    description: &str,
    context: &str,
    file_contents: &[(String, String)],
    prior_summaries: &[String],
) -> String {
    let mut prompt = String::new();
    if !prior_summaries.is_empty() {
        prompt.push_str("# Previously completed tasks\n");
        for s in prior_summaries {
            prompt.push_str(&format!("- {s}\n"));
        }
        prompt.push('\n');
    }
    if !file_contents.is_empty() {
        prompt.push_str("# Relevant files\n");
        for (path, content) in file_contents {
            prompt.push_str(&format!("## {path}\n```\n{content}\n```\n"));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("# Your task\n{description}\n"));
    if !context.is_empty() {
        prompt.push_str(&format!("\n# Context from the Planner\n{context}\n"));
    }
    prompt.push_str(
        "\nImplement this task now using tools. Do not re-plan, do not ask \
         questions — read what you need and make the changes.",
    );
    prompt
}

/// Prompt for the Planner's post-run review.
pub fn review_prompt(task_reports: &[String], files_modified: usize, errors: usize) -> String {
    format!(
        "All Coder tasks have finished. Reports:\n{}\n\nTotals: {} file(s) \
         modified, {} error(s). Write a 3-6 sentence summary for the user: \
         what was built, anything that failed, and what they might want \
         next. Plain prose, no task blocks.",
        task_reports.join("\n"),
        files_modified,
        errors
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn plan_mode_adds_restriction() {
        let p = compose_system_prompt(Mode::Plan, None, false);
        assert!(p.contains("PLAN mode"));
        assert!(p.contains("read-only"));
    }

    #[test]
    fn missing_project_adds_self_modification_notice() {
        let p = compose_system_prompt(Mode::Build, None, false);
        assert!(p.contains("no sandbox"));
    }

    #[test]
    fn remote_section_is_optional() {
        let with = compose_system_prompt(Mode::Build, None, true);
        let without = compose_system_prompt(Mode::Build, None, false);
        assert!(with.contains("Remote file access"));
        assert!(!without.contains("Remote file access"));
    }

    #[test]
    fn digest_covers_manifest_layout_and_configs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name": "demo", "scripts": {"dev": "vite"}, "dependencies": {"react": "1"}}"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.jsx"), "x").unwrap();
        std::fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();

        let digest = project_digest(dir.path());
        assert!(digest.contains("name=demo"));
        assert!(digest.contains("scripts=[dev]"));
        assert!(digest.contains("Top-level entries"));
        assert!(digest.contains("tsconfig.json"));
        assert!(digest.contains("src/: app.jsx"));
    }

    #[test]
    fn digest_includes_entry_head() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("server.js"), "const express = require('express');\n")
            .unwrap();
        let digest = project_digest(dir.path());
        assert!(digest.contains("Head of server.js"));
        assert!(digest.contains("require('express')"));
    }

    #[test]
    fn digest_is_bounded() {
        let dir = TempDir::new().unwrap();
        let huge_line = "x".repeat(10_000);
        std::fs::write(dir.path().join("server.js"), &huge_line).unwrap();
        let digest = project_digest(dir.path());
        assert!(digest.len() < SECTION_CAP * 3 + 8);
    }

    #[test]
    fn coder_prompt_sections_in_order() {
        let p = coder_task_prompt(
            "Create the health endpoint",
            "Use express",
            &[("server.js".into(), "// empty".into())],
            &["Created package.json".into()],
        );
        let prev = p.find("Previously completed").unwrap();
        let files = p.find("Relevant files").unwrap();
        let task = p.find("Your task").unwrap();
        assert!(prev < files && files < task);
    }
}
