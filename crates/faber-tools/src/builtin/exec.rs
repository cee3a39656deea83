// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(unix)]
use libc;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::sandbox::blocked_command_reason;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Combined stdout+stderr byte ceiling returned to the model.
const OUTPUT_CAP_BYTES: usize = 2 * 1024 * 1024;

const EXECUTE_TIMEOUT: Duration = Duration::from_secs(90);
const TEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ExecuteCommandTool;

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory and return its combined \
         output. Do NOT start dev servers or kill processes — the project runs \
         under the supervisor and reloads automatically. Output is capped at \
         2 MiB; long-running commands are cut off after 90 seconds."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        run_shell(call, ctx, EXECUTE_TIMEOUT, true).await
    }
}

pub struct RunTestTool;

#[async_trait]
impl Tool for RunTestTool {
    fn name(&self) -> &str {
        "run_test"
    }

    fn description(&self) -> &str {
        "Run a test command (e.g. 'npm test', 'node test.js') and return its \
         output. Limited to 30 seconds — run focused tests, not whole suites, \
         when the project is large."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The test command to execute"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        run_shell(call, ctx, TEST_TIMEOUT, false).await
    }
}

/// Shared driver for the shell-running tools.
///
/// The child's stdout and stderr are merged line-by-line into one transcript;
/// when `stream` is set each line is also forwarded to the per-tool-call
/// output callback so the UI can tail long commands.  On timeout the child is
/// reaped and whatever output was captured is returned with the error.
async fn run_shell(
    call: &ToolCall,
    ctx: &ToolContext,
    timeout: Duration,
    stream: bool,
) -> ToolOutput {
    let Some(command) = call.args.get("command").and_then(|v| v.as_str()) else {
        return ToolOutput::err(&call.id, "missing 'command'");
    };

    if let Some(reason) = blocked_command_reason(command) {
        return ToolOutput::err(&call.id, reason);
    }

    debug!(cmd = %command, "running shell command");

    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(command)
        .current_dir(&ctx.working_dir)
        .env("FORCE_COLOR", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // setsid() detaches the child from any controlling terminal so it cannot
    // read from or write escape sequences to the caller's tty.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return ToolOutput::err(&call.id, format!("Tool error: spawn failed: {e}")),
    };

    // Dedicated reader tasks merge stdout and stderr into one line channel
    // in arrival order; the collector below is then free to be dropped on
    // timeout without losing buffered reader state.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    if let Some(out) = child.stdout.take() {
        let tx = line_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(out).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }
    if let Some(err) = child.stderr.take() {
        let tx = line_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }
    drop(line_tx);

    let mut transcript = String::new();
    let mut truncated = false;

    let collect = async {
        while let Some(line) = line_rx.recv().await {
            if transcript.len() < OUTPUT_CAP_BYTES {
                transcript.push_str(&line);
                transcript.push('\n');
                if stream {
                    ctx.emit_command_output(&call.id, &line);
                }
            } else if !truncated {
                truncated = true;
                transcript.push_str("... [output truncated at 2 MiB]\n");
            }
        }
        child.wait().await
    };

    match tokio::time::timeout(timeout, collect).await {
        Ok(Ok(status)) => {
            let code = status.code().unwrap_or(-1);
            if transcript.is_empty() {
                transcript = format!("[exit {code}]");
            }
            if status.success() {
                ToolOutput::ok(&call.id, transcript)
            } else {
                ToolOutput::err(&call.id, format!("[exit {code}]\n{transcript}"))
            }
        }
        Ok(Err(e)) => ToolOutput::err(&call.id, format!("Tool error: wait failed: {e}")),
        Err(_) => {
            // `child` drops when this function returns; kill_on_drop then
            // reaps the process.
            ToolOutput::err(
                &call.id,
                format!(
                    "Command timed out after {}s. Partial output:\n{transcript}",
                    timeout.as_secs()
                ),
            )
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "execute_command".into(),
            args,
        }
    }

    #[tokio::test]
    async fn echo_returns_stdout() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ExecuteCommandTool
            .execute(&call(json!({"command": "echo hello"})), &ctx)
            .await;
        assert!(out.success, "{}", out.result);
        assert!(out.result.contains("hello"));
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ExecuteCommandTool
            .execute(&call(json!({"command": "echo oops >&2"})), &ctx)
            .await;
        assert!(out.result.contains("oops"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_code() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ExecuteCommandTool
            .execute(&call(json!({"command": "exit 3"})), &ctx)
            .await;
        assert!(!out.success);
        assert!(out.result.contains("[exit 3]"));
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("here.txt"), "x").unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ExecuteCommandTool
            .execute(&call(json!({"command": "ls"})), &ctx)
            .await;
        assert!(out.result.contains("here.txt"));
    }

    #[tokio::test]
    async fn dev_server_command_is_blocked() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ExecuteCommandTool
            .execute(&call(json!({"command": "npm run dev"})), &ctx)
            .await;
        assert!(!out.success);
        assert!(out.result.contains("BLOCKED"));
    }

    #[tokio::test]
    async fn run_test_blocks_process_management() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = RunTestTool
            .execute(&call(json!({"command": "pkill node"})), &ctx)
            .await;
        assert!(!out.success);
        assert!(out.result.contains("BLOCKED"));
    }

    #[tokio::test]
    async fn output_streams_to_callback() {
        let dir = TempDir::new().unwrap();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
        let seen2 = Arc::clone(&seen);
        let mut ctx = ToolContext::new(dir.path());
        ctx.on_command_output = Some(Arc::new(move |_id, chunk| {
            seen2.lock().unwrap().push(chunk.to_string());
        }));
        ExecuteCommandTool
            .execute(&call(json!({"command": "echo one && echo two"})), &ctx)
            .await;
        let lines = seen.lock().unwrap();
        assert_eq!(lines.as_slice(), &["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn timeout_returns_partial_output() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = run_shell(
            &call(json!({"command": "echo started; sleep 30"})),
            &ctx,
            Duration::from_millis(300),
            false,
        )
        .await;
        assert!(!out.success);
        assert!(out.result.contains("timed out"));
        assert!(out.result.contains("started"));
    }
}
