// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Version control over the project directory.
///
/// The action set is closed; free-form git arguments are not accepted so the
/// model cannot smuggle arbitrary flags through this tool.
pub struct GitTool;

const ACTIONS: &[&str] = &[
    "init", "status", "add", "commit", "diff", "log", "branch", "checkout", "reset",
];

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Run a git operation in the project: init, status, add (paths or all), \
         commit (message required), diff, log, branch (optional name), \
         checkout (target required), reset (soft, to HEAD~1). User identity \
         is configured automatically on first use."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ACTIONS,
                    "description": "The git operation"
                },
                "message": {
                    "type": "string",
                    "description": "Commit message (for action='commit')"
                },
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Paths for action='add' (default: all)"
                },
                "target": {
                    "type": "string",
                    "description": "Branch or ref for checkout/branch"
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(action) = call.args.get("action").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'action'");
        };
        if !ACTIONS.contains(&action) {
            return ToolOutput::err(&call.id, format!("unknown git action '{action}'"));
        }

        if let Err(e) = ensure_identity(ctx).await {
            return ToolOutput::err(&call.id, format!("Tool error: {e}"));
        }

        let result = match action {
            "init" => git(ctx, &["init"]).await,
            "status" => git(ctx, &["status", "--short", "--branch"]).await,
            "add" => {
                let paths: Vec<String> = call
                    .args
                    .get("paths")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|p| p.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let mut args = vec!["add".to_string()];
                if paths.is_empty() {
                    args.push("-A".to_string());
                } else {
                    args.push("--".to_string());
                    args.extend(paths);
                }
                let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                git(ctx, &refs).await
            }
            "commit" => {
                let Some(message) = call.args.get("message").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "action='commit' needs 'message'");
                };
                git(ctx, &["commit", "-m", message]).await
            }
            "diff" => git(ctx, &["diff"]).await,
            "log" => git(ctx, &["log", "--oneline", "-20"]).await,
            "branch" => match call.args.get("target").and_then(|v| v.as_str()) {
                Some(name) => git(ctx, &["branch", name]).await,
                None => git(ctx, &["branch", "--list"]).await,
            },
            "checkout" => {
                let Some(target) = call.args.get("target").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "action='checkout' needs 'target'");
                };
                git(ctx, &["checkout", target]).await
            }
            "reset" => git(ctx, &["reset", "--soft", "HEAD~1"]).await,
            _ => unreachable!("validated above"),
        };

        match result {
            Ok(out) if out.trim().is_empty() => {
                ToolOutput::ok(&call.id, format!("git {action}: done"))
            }
            Ok(out) => ToolOutput::ok(&call.id, out),
            Err(e) => ToolOutput::err(&call.id, e),
        }
    }
}

/// Commits need an identity; configure a local one if the repo has none.
async fn ensure_identity(ctx: &ToolContext) -> anyhow::Result<()> {
    if !ctx.working_dir.join(".git").exists() {
        return Ok(());
    }
    if git(ctx, &["config", "user.email"]).await.is_ok() {
        return Ok(());
    }
    let _ = git(ctx, &["config", "user.email", "agent@faber.local"]).await;
    let _ = git(ctx, &["config", "user.name", "Faber Agent"]).await;
    Ok(())
}

async fn git(ctx: &ToolContext, args: &[&str]) -> Result<String, String> {
    let result = tokio::time::timeout(
        GIT_TIMEOUT,
        Command::new("git")
            .args(args)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .output(),
    )
    .await;

    match result {
        Ok(Ok(out)) => {
            let stdout = String::from_utf8_lossy(&out.stdout).to_string();
            let stderr = String::from_utf8_lossy(&out.stderr).to_string();
            if out.status.success() {
                Ok(if stdout.trim().is_empty() { stderr } else { stdout })
            } else {
                Err(format!(
                    "git {} failed: {}",
                    args.first().unwrap_or(&""),
                    if stderr.trim().is_empty() { stdout } else { stderr }
                ))
            }
        }
        Ok(Err(e)) => Err(format!("Tool error: cannot run git: {e}")),
        Err(_) => Err("git timed out".to_string()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "git".into(),
            args,
        }
    }

    #[tokio::test]
    async fn init_add_commit_log_cycle() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let ctx = ToolContext::new(dir.path());
        let t = GitTool;

        let out = t.execute(&call(json!({"action": "init"})), &ctx).await;
        assert!(out.success, "{}", out.result);

        let out = t.execute(&call(json!({"action": "add"})), &ctx).await;
        assert!(out.success, "{}", out.result);

        let out = t
            .execute(&call(json!({"action": "commit", "message": "first"})), &ctx)
            .await;
        assert!(out.success, "{}", out.result);

        let out = t.execute(&call(json!({"action": "log"})), &ctx).await;
        assert!(out.success);
        assert!(out.result.contains("first"));
    }

    #[tokio::test]
    async fn status_shows_untracked() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let t = GitTool;
        t.execute(&call(json!({"action": "init"})), &ctx).await;
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        let out = t.execute(&call(json!({"action": "status"})), &ctx).await;
        assert!(out.success);
        assert!(out.result.contains("new.txt"));
    }

    #[tokio::test]
    async fn commit_without_message_is_refused() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = GitTool.execute(&call(json!({"action": "commit"})), &ctx).await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn unknown_action_is_refused() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = GitTool.execute(&call(json!({"action": "push"})), &ctx).await;
        assert!(!out.success);
        assert!(out.result.contains("unknown git action"));
    }
}
