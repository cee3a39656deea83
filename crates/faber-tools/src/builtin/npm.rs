// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

const INSTALL_TIMEOUT: Duration = Duration::from_secs(120);
const DIAG_TIMEOUT: Duration = Duration::from_secs(60);
const AUDIT_TIMEOUT: Duration = Duration::from_secs(60);
/// Byte cap for captured npm output.
const OUTPUT_CAP: usize = 2 * 1024 * 1024;

pub struct InstallPackageTool;

#[async_trait]
impl Tool for InstallPackageTool {
    fn name(&self) -> &str {
        "install_package"
    }

    fn description(&self) -> &str {
        "Install an npm package into the project ('npm install <name>'). \
         Initializes package.json first when the project has none. Set 'dev' \
         for a devDependency. Reports the resolved version on success."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Package name, optionally with a version spec (e.g. express@4)"
                },
                "dev": {
                    "type": "boolean",
                    "description": "Install as a devDependency (npm install --save-dev)"
                }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(name) = call.args.get("name").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'name'");
        };
        if name.trim().is_empty() || name.contains(char::is_whitespace) {
            return ToolOutput::err(&call.id, format!("invalid package name '{name}'"));
        }
        let dev = call.args.get("dev").and_then(|v| v.as_bool()).unwrap_or(false);

        // npm refuses to install into a directory without a manifest in a way
        // that is useful to the model, so create a minimal one first.
        let manifest = ctx.working_dir.join("package.json");
        if !manifest.exists() {
            let initial = json!({
                "name": project_slug(ctx),
                "version": "1.0.0",
                "private": true
            });
            if let Err(e) = std::fs::write(&manifest, format!("{:#}", initial)) {
                return ToolOutput::err(&call.id, format!("cannot initialize package.json: {e}"));
            }
        }

        debug!(package = %name, dev, "npm install");
        let mut args = vec!["install", name];
        if dev {
            args.push("--save-dev");
        }
        let output = match run_npm(&args, ctx, INSTALL_TIMEOUT).await {
            Ok(o) => o,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        // Read back the manifest to report what actually resolved.
        let resolved = std::fs::read_to_string(&manifest)
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .and_then(|pkg| {
                let section = if dev { "devDependencies" } else { "dependencies" };
                let bare = name.split('@').next().unwrap_or(name);
                pkg[section][bare].as_str().map(|v| format!("{bare}@{v}"))
            });

        match resolved {
            Some(spec) => ToolOutput::ok(&call.id, format!("Installed {spec}\n{output}")),
            None => ToolOutput::ok(&call.id, format!("Installed {name}\n{output}")),
        }
    }
}

pub struct RunDiagnosticsTool;

#[async_trait]
impl Tool for RunDiagnosticsTool {
    fn name(&self) -> &str {
        "run_diagnostics"
    }

    fn description(&self) -> &str {
        "Type-check the project: runs 'npx tsc --noEmit' for TypeScript \
         projects, or a syntax check over .js entry files otherwise. Use \
         after a batch of edits to catch errors before running."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        if !ctx.working_dir.join("node_modules").exists() {
            return ToolOutput::ok(
                &call.id,
                "node_modules is missing, so diagnostics cannot run. Install \
                 dependencies first (install_package or execute_command with \
                 'npm install'), then re-run diagnostics.",
            );
        }

        let has_tsconfig = ctx.working_dir.join("tsconfig.json").exists();
        let output = if has_tsconfig {
            run_npm(&["exec", "--", "tsc", "--noEmit"], ctx, DIAG_TIMEOUT).await
        } else {
            // Plain JS: `node --check` each top-level entry candidate.
            let mut report = String::new();
            for candidate in ["index.js", "server.js", "app.js", "main.js"] {
                let path = ctx.working_dir.join(candidate);
                if !path.exists() {
                    continue;
                }
                let check = Command::new("node")
                    .arg("--check")
                    .arg(candidate)
                    .current_dir(&ctx.working_dir)
                    .stdin(Stdio::null())
                    .output()
                    .await;
                match check {
                    Ok(out) if out.status.success() => {
                        report.push_str(&format!("{candidate}: OK\n"));
                    }
                    Ok(out) => {
                        report.push_str(&format!(
                            "{candidate}: {}\n",
                            String::from_utf8_lossy(&out.stderr)
                        ));
                    }
                    Err(e) => report.push_str(&format!("{candidate}: {e}\n")),
                }
            }
            if report.is_empty() {
                report = "No entry files found to check (looked for index.js, \
                          server.js, app.js, main.js)."
                    .to_string();
            }
            Ok(report)
        };

        match output {
            Ok(text) if text.trim().is_empty() => {
                ToolOutput::ok(&call.id, "No diagnostics reported.")
            }
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, e),
        }
    }
}

pub struct AuditDependenciesTool;

#[async_trait]
impl Tool for AuditDependenciesTool {
    fn name(&self) -> &str {
        "audit_dependencies"
    }

    fn description(&self) -> &str {
        "Run 'npm audit --json' and summarize known vulnerabilities by severity."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        if !ctx.working_dir.join("package.json").exists() {
            return ToolOutput::err(&call.id, "no package.json in this project");
        }
        let raw = match run_npm(&["audit", "--json"], ctx, AUDIT_TIMEOUT).await {
            Ok(o) => o,
            // npm audit exits non-zero when vulnerabilities exist; the JSON
            // body is still what we want.
            Err(e) if e.contains('{') => e,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let Some(start) = raw.find('{') else {
            return ToolOutput::ok(&call.id, "npm audit produced no report");
        };
        let Ok(report) = serde_json::from_str::<Value>(&raw[start..]) else {
            return ToolOutput::ok(&call.id, "npm audit produced no parseable report");
        };

        let vulns = &report["metadata"]["vulnerabilities"];
        let summary: Vec<String> = ["critical", "high", "moderate", "low", "info"]
            .iter()
            .filter_map(|sev| {
                let n = vulns[*sev].as_u64().unwrap_or(0);
                (n > 0).then(|| format!("{sev}: {n}"))
            })
            .collect();

        if summary.is_empty() {
            ToolOutput::ok(&call.id, "No known vulnerabilities.")
        } else {
            ToolOutput::ok(
                &call.id,
                format!("Vulnerabilities found — {}", summary.join(", ")),
            )
        }
    }
}

/// Run npm with the given args, returning combined output or an error string.
async fn run_npm(args: &[&str], ctx: &ToolContext, timeout: Duration) -> Result<String, String> {
    let mut cmd = Command::new("npm");
    cmd.args(args)
        .current_dir(&ctx.working_dir)
        .env("FORCE_COLOR", "0")
        .env("NO_UPDATE_NOTIFIER", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let result = tokio::time::timeout(timeout, cmd.output()).await;
    match result {
        Ok(Ok(out)) => {
            let mut text = String::from_utf8_lossy(&out.stdout).to_string();
            let err = String::from_utf8_lossy(&out.stderr);
            if !err.trim().is_empty() {
                text.push_str("\n");
                text.push_str(err.trim());
            }
            if text.len() > OUTPUT_CAP {
                text.truncate(OUTPUT_CAP);
                text.push_str("\n... [output truncated]");
            }
            if out.status.success() {
                Ok(text)
            } else {
                Err(format!(
                    "npm {} failed [exit {}]\n{text}",
                    args.first().unwrap_or(&""),
                    out.status.code().unwrap_or(-1)
                ))
            }
        }
        Ok(Err(e)) => Err(format!("Tool error: cannot run npm: {e}")),
        Err(_) => Err(format!("npm {} timed out after {}s", args.first().unwrap_or(&""), timeout.as_secs())),
    }
}

fn project_slug(ctx: &ToolContext) -> String {
    ctx.working_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase().replace(' ', "-"))
        .unwrap_or_else(|| "project".to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "t".into(),
            args,
        }
    }

    #[tokio::test]
    async fn install_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = InstallPackageTool
            .execute(&call(json!({"name": "evil; rm -rf /"})), &ctx)
            .await;
        assert!(!out.success);
        assert!(out.result.contains("invalid package name"));
    }

    #[tokio::test]
    async fn install_requires_name() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = InstallPackageTool.execute(&call(json!({})), &ctx).await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn diagnostics_without_node_modules_is_instructive() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = RunDiagnosticsTool.execute(&call(json!({})), &ctx).await;
        assert!(out.success);
        assert!(out.result.contains("node_modules is missing"));
        assert!(out.result.contains("npm install"));
    }

    #[tokio::test]
    async fn audit_without_manifest_is_error() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = AuditDependenciesTool.execute(&call(json!({})), &ctx).await;
        assert!(!out.success);
        assert!(out.result.contains("package.json"));
    }

    #[test]
    fn project_slug_uses_directory_name() {
        let ctx = ToolContext::new("/tmp/My Project");
        assert_eq!(project_slug(&ctx), "my-project");
    }
}
