// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::sandbox::resolve_path;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Total result lines returned to the model.
const RESULT_LINE_CAP: usize = 80;
/// Skip files larger than this; binary blobs and bundles are noise.
const MAX_SEARCH_FILE_BYTES: u64 = 512 * 1024;

/// Bounded grep across the project tree.
pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search project files for a regex pattern. Optional 'include' glob \
         (e.g. '*.js' or 'src/**/*.ts') narrows which files are scanned. \
         Returns up to 80 matching lines as path:line:text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "include": {
                    "type": "string",
                    "description": "Optional filename glob filter"
                },
                "path": {
                    "type": "string",
                    "description": "Subdirectory to search (default '.')"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(pattern) = call.args.get("pattern").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'pattern'");
        };
        let include = call.args.get("include").and_then(|v| v.as_str());
        let subdir = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");

        let re = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid pattern: {e}")),
        };
        let include_re = match include.map(glob_to_regex).transpose() {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid include glob: {e}")),
        };
        let root = match resolve_path(&ctx.working_dir, subdir, ctx.sandboxed) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let mut lines: Vec<String> = Vec::new();
        'files: for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(name.starts_with('.') && e.depth() > 0) && name != "node_modules"
            })
            .flatten()
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_SEARCH_FILE_BYTES {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if let Some(inc) = &include_re {
                if !inc.is_match(&rel) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    lines.push(format!("{rel}:{}:{}", i + 1, line.trim_end()));
                    if lines.len() >= RESULT_LINE_CAP {
                        lines.push(format!("... (stopped at {RESULT_LINE_CAP} matches)"));
                        break 'files;
                    }
                }
            }
        }

        if lines.is_empty() {
            return ToolOutput::ok(&call.id, format!("No matches for '{pattern}'"));
        }
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

/// Translate a filename glob into an anchored regex.  `**` crosses directory
/// separators, `*` does not, `?` matches one character.
fn glob_to_regex(glob: &str) -> anyhow::Result<Regex> {
    let mut re = String::from("(?:^|/)");
    // A glob with no slash matches against the basename anywhere in the tree;
    // one with slashes matches from the start of the relative path.
    if glob.contains('/') {
        re = String::from("^");
    }
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following '/' so "src/**/*.ts" matches "src/a.ts".
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                re.push('\\');
                re.push(c);
            }
            other => re.push(other),
        }
    }
    re.push('$');
    Ok(Regex::new(&re)?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "search_files".into(),
            args,
        }
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.js"), "const port = 3000;\nstart();\n").unwrap();
        std::fs::write(dir.path().join("readme.md"), "the port is configurable\n").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/x.js"), "port everywhere").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = project();
        let ctx = ToolContext::new(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "port"})), &ctx)
            .await;
        assert!(out.success);
        assert!(out.result.contains("src/app.js:1:"));
        assert!(out.result.contains("readme.md:1:"));
    }

    #[tokio::test]
    async fn node_modules_is_skipped() {
        let dir = project();
        let ctx = ToolContext::new(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "port"})), &ctx)
            .await;
        assert!(!out.result.contains("node_modules"));
    }

    #[tokio::test]
    async fn include_glob_filters() {
        let dir = project();
        let ctx = ToolContext::new(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "port", "include": "*.js"})), &ctx)
            .await;
        assert!(out.result.contains("src/app.js"));
        assert!(!out.result.contains("readme.md"));
    }

    #[tokio::test]
    async fn no_matches_is_success_with_note() {
        let dir = project();
        let ctx = ToolContext::new(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "zzz_nothing"})), &ctx)
            .await;
        assert!(out.success);
        assert!(out.result.contains("No matches"));
    }

    #[tokio::test]
    async fn match_count_is_capped() {
        let dir = TempDir::new().unwrap();
        let body: String = (0..200).map(|i| format!("match line {i}\n")).collect();
        std::fs::write(dir.path().join("big.txt"), body).unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "match"})), &ctx)
            .await;
        assert!(out.result.contains("stopped at 80 matches"));
        assert!(out.result.lines().count() <= RESULT_LINE_CAP + 1);
    }

    #[tokio::test]
    async fn invalid_regex_is_error() {
        let dir = project();
        let ctx = ToolContext::new(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "[unclosed"})), &ctx)
            .await;
        assert!(!out.success);
    }

    // ── Glob translation ──────────────────────────────────────────────────────

    #[test]
    fn basename_glob_matches_anywhere() {
        let re = glob_to_regex("*.ts").unwrap();
        assert!(re.is_match("a.ts"));
        assert!(re.is_match("src/deep/b.ts"));
        assert!(!re.is_match("a.tsx"));
    }

    #[test]
    fn doublestar_crosses_directories() {
        let re = glob_to_regex("src/**/*.ts").unwrap();
        assert!(re.is_match("src/a.ts"));
        assert!(re.is_match("src/x/y/b.ts"));
        assert!(!re.is_match("lib/a.ts"));
    }
}
