// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Lifecycle management of user-project subprocesses.
//!
//! One entry per project directory.  The supervisor exclusively owns each
//! child process; log lines are shared with subscribers through a broadcast
//! channel and a bounded ring buffer.
//!
//! State machine: `stopped → starting → running → {stopped | error}`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, warn};

use faber_tools::{ProjectRuntime, RuntimeStatus};

use crate::ring::RingBuffer;
use crate::static_server::serve_static;

/// First port handed out by the sequential allocator.
const PORT_BASE: u16 = 3100;
/// Log ring capacity per project.
const LOG_CAP: usize = 1000;
/// If the process has not announced a port by then, assume it is serving.
const RUNNING_FALLBACK: Duration = Duration::from_secs(8);
/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Starting => "starting",
            ProjectStatus::Running => "running",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Error => "error",
        }
    }
}

/// Events fanned out to subscribers.  Per-project ordering follows the
/// subprocess's output order; no cross-project ordering is promised.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProjectEvent {
    Log { project: PathBuf, line: String },
    Status { project: PathBuf, status: ProjectStatus },
    PortChanged { project: PathBuf, port: u16 },
}

/// How a project should be launched, detected from its layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPlan {
    /// Vite project: launched with an explicit port and host.
    Vite,
    /// Any shell command (npm scripts, node entry, python entry).
    Shell(String),
    /// No server process — serve this directory with the built-in static
    /// server.
    StaticDir(PathBuf),
}

struct ProjectEntry {
    status: ProjectStatus,
    port: u16,
    logs: RingBuffer,
    /// Signals the monitor task to begin the graceful-stop sequence.
    shutdown: Option<oneshot::Sender<()>>,
    /// Abort handle for the static-server task, when that is what runs.
    static_task: Option<tokio::task::JoinHandle<()>>,
}

pub struct Supervisor {
    projects: Mutex<HashMap<PathBuf, ProjectEntry>>,
    next_port: AtomicU16,
    events: broadcast::Sender<ProjectEvent>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            projects: Mutex::new(HashMap::new()),
            next_port: AtomicU16::new(PORT_BASE),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.events.subscribe()
    }

    /// Seed the port allocator after restoring persisted projects:
    /// `max(existing)+1`.
    pub fn set_next_port(&self, port: u16) {
        self.next_port.store(port.max(PORT_BASE), Ordering::SeqCst);
    }

    /// Start the project rooted at `dir`.  Refuses while an entry is already
    /// `starting` or `running`.  Returns the allocated port.
    pub async fn start(self: &Arc<Self>, dir: &Path) -> anyhow::Result<u16> {
        let dir = dir
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("project directory unavailable: {e}"))?;
        {
            let projects = self.projects.lock().await;
            if let Some(entry) = projects.get(&dir) {
                if matches!(entry.status, ProjectStatus::Starting | ProjectStatus::Running) {
                    anyhow::bail!("project is already {}", entry.status.as_str());
                }
            }
        }

        let plan = detect_start_plan(&dir)?;
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        debug!(project = %dir.display(), ?plan, port, "starting project");

        match plan {
            StartPlan::StaticDir(root) => self.start_static(dir, root, port).await,
            StartPlan::Vite => {
                let cmd = format!("npx vite --port {port} --host 0.0.0.0");
                self.start_process(dir, cmd, port).await
            }
            StartPlan::Shell(cmd) => self.start_process(dir, cmd, port).await,
        }
    }

    async fn start_static(
        self: &Arc<Self>,
        dir: PathBuf,
        root: PathBuf,
        port: u16,
    ) -> anyhow::Result<u16> {
        let task = tokio::spawn(async move {
            if let Err(e) = serve_static(root, port).await {
                warn!(port, "static server exited: {e}");
            }
        });

        let mut projects = self.projects.lock().await;
        let mut logs = RingBuffer::new(LOG_CAP);
        logs.push(format!("Serving static files on port {port}"));
        projects.insert(
            dir.clone(),
            ProjectEntry {
                status: ProjectStatus::Running,
                port,
                logs,
                shutdown: None,
                static_task: Some(task),
            },
        );
        drop(projects);

        self.emit(ProjectEvent::Status {
            project: dir.clone(),
            status: ProjectStatus::Running,
        });
        self.emit(ProjectEvent::PortChanged { project: dir, port });
        Ok(port)
    }

    async fn start_process(
        self: &Arc<Self>,
        dir: PathBuf,
        command: String,
        port: u16,
    ) -> anyhow::Result<u16> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&dir)
            .env("PORT", port.to_string())
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                let mut projects = self.projects.lock().await;
                projects.insert(
                    dir.clone(),
                    ProjectEntry {
                        status: ProjectStatus::Error,
                        port,
                        logs: RingBuffer::new(LOG_CAP),
                        shutdown: None,
                        static_task: None,
                    },
                );
                drop(projects);
                self.emit(ProjectEvent::Status {
                    project: dir.clone(),
                    status: ProjectStatus::Error,
                });
                anyhow::bail!("failed to spawn '{command}': {e}");
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = child.id();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        {
            let mut projects = self.projects.lock().await;
            projects.insert(
                dir.clone(),
                ProjectEntry {
                    status: ProjectStatus::Starting,
                    port,
                    logs: RingBuffer::new(LOG_CAP),
                    shutdown: Some(shutdown_tx),
                    static_task: None,
                },
            );
        }
        self.emit(ProjectEvent::Status {
            project: dir.clone(),
            status: ProjectStatus::Starting,
        });

        // Line readers: ring + event fan-out + port scraping.
        if let Some(out) = stdout {
            let sup = Arc::clone(self);
            let project = dir.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    sup.ingest_line(&project, line).await;
                }
            });
        }
        if let Some(err) = stderr {
            let sup = Arc::clone(self);
            let project = dir.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    sup.ingest_line(&project, line).await;
                }
            });
        }

        // Fallback: if nothing announced a port within the window, assume the
        // process is serving on the allocated one.
        {
            let sup = Arc::clone(self);
            let project = dir.clone();
            tokio::spawn(async move {
                tokio::time::sleep(RUNNING_FALLBACK).await;
                sup.promote_if_still_starting(&project).await;
            });
        }

        // Monitor: observe exit, or drive the graceful-stop sequence.
        {
            let sup = Arc::clone(self);
            let project = dir.clone();
            tokio::spawn(async move {
                let mut shutdown_rx = shutdown_rx;
                // `wait` is cancel-safe, so losing the race here does not
                // lose the exit status.
                let exited = tokio::select! {
                    _ = child.wait() => true,
                    _ = &mut shutdown_rx => false,
                };
                if !exited {
                    #[cfg(unix)]
                    if let Some(pid) = pid {
                        unsafe {
                            libc::kill(pid as i32, libc::SIGTERM);
                        }
                    }
                    if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                        let _ = child.kill().await;
                        let _ = child.wait().await;
                    }
                }
                sup.mark(&project, ProjectStatus::Stopped).await;
            });
        }

        Ok(port)
    }

    /// Stop the project: SIGTERM, then SIGKILL after the grace period.
    pub async fn stop(&self, dir: &Path) -> anyhow::Result<()> {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let mut projects = self.projects.lock().await;
        let Some(entry) = projects.get_mut(&dir) else {
            anyhow::bail!("no such project");
        };
        if let Some(task) = entry.static_task.take() {
            task.abort();
            entry.status = ProjectStatus::Stopped;
            drop(projects);
            self.emit(ProjectEvent::Status {
                project: dir,
                status: ProjectStatus::Stopped,
            });
            return Ok(());
        }
        match entry.shutdown.take() {
            Some(tx) => {
                // The monitor task performs the kill sequence and marks the
                // entry stopped when the process is gone.
                let _ = tx.send(());
                Ok(())
            }
            None => anyhow::bail!("project is not running"),
        }
    }

    pub async fn status(&self, dir: &Path) -> Option<(ProjectStatus, u16)> {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let projects = self.projects.lock().await;
        projects.get(&dir).map(|e| (e.status, e.port))
    }

    pub async fn tail(&self, dir: &Path, n: usize) -> Vec<String> {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let projects = self.projects.lock().await;
        projects
            .get(&dir)
            .map(|e| e.logs.tail(n))
            .unwrap_or_default()
    }

    async fn ingest_line(&self, project: &Path, line: String) {
        let detected = parse_port_from_line(&line);
        {
            let mut projects = self.projects.lock().await;
            if let Some(entry) = projects.get_mut(project) {
                entry.logs.push(line.clone());
            }
        }
        self.emit(ProjectEvent::Log {
            project: project.to_path_buf(),
            line,
        });

        if let Some(port) = detected {
            self.announce_port(project, port).await;
        }
    }

    /// First port announcement switches the project to `running`; a port
    /// that differs from the allocated one also raises `port_changed`.
    async fn announce_port(&self, project: &Path, port: u16) {
        let (became_running, port_changed) = {
            let mut projects = self.projects.lock().await;
            let Some(entry) = projects.get_mut(project) else {
                return;
            };
            let became_running = entry.status == ProjectStatus::Starting;
            let port_changed = entry.port != port || became_running;
            if became_running {
                entry.status = ProjectStatus::Running;
            }
            entry.port = port;
            (became_running, port_changed)
        };
        if became_running {
            self.emit(ProjectEvent::Status {
                project: project.to_path_buf(),
                status: ProjectStatus::Running,
            });
        }
        if port_changed {
            self.emit(ProjectEvent::PortChanged {
                project: project.to_path_buf(),
                port,
            });
        }
    }

    async fn promote_if_still_starting(&self, project: &Path) {
        let promote = {
            let mut projects = self.projects.lock().await;
            match projects.get_mut(project) {
                Some(entry) if entry.status == ProjectStatus::Starting => {
                    entry.status = ProjectStatus::Running;
                    true
                }
                _ => false,
            }
        };
        if promote {
            self.emit(ProjectEvent::Status {
                project: project.to_path_buf(),
                status: ProjectStatus::Running,
            });
        }
    }

    async fn mark(&self, project: &Path, status: ProjectStatus) {
        {
            let mut projects = self.projects.lock().await;
            if let Some(entry) = projects.get_mut(project) {
                entry.status = status;
                entry.shutdown = None;
            }
        }
        self.emit(ProjectEvent::Status {
            project: project.to_path_buf(),
            status,
        });
    }

    fn emit(&self, event: ProjectEvent) {
        // Fire-and-forget: a lagging or absent subscriber never blocks the
        // supervisor.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ProjectRuntime for Supervisor {
    async fn tail_logs(&self, project_dir: &Path, lines: usize) -> Vec<String> {
        self.tail(project_dir, lines).await
    }

    async fn project_status(&self, project_dir: &Path) -> Option<RuntimeStatus> {
        self.status(project_dir).await.map(|(status, port)| RuntimeStatus {
            status: status.as_str().to_string(),
            port: Some(port),
        })
    }
}

/// Detect how to launch the project, in priority order.
pub fn detect_start_plan(dir: &Path) -> anyhow::Result<StartPlan> {
    let package_json = dir.join("package.json");
    if package_json.is_file() {
        let pkg: Value = std::fs::read_to_string(&package_json)
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or(Value::Null);

        let has_vite_config = ["vite.config.js", "vite.config.ts", "vite.config.mjs"]
            .iter()
            .any(|f| dir.join(f).is_file());
        let has_vite_dep = pkg["dependencies"]["vite"].is_string()
            || pkg["devDependencies"]["vite"].is_string();
        if has_vite_config || has_vite_dep {
            return Ok(StartPlan::Vite);
        }

        if pkg["scripts"]["dev"].is_string() {
            return Ok(StartPlan::Shell("npm run dev".into()));
        }
        if pkg["scripts"]["start"].is_string() {
            return Ok(StartPlan::Shell("npm start".into()));
        }
        if let Some(main) = pkg["main"].as_str() {
            return Ok(StartPlan::Shell(format!("node {main}")));
        }
    }

    for py in ["main.py", "app.py"] {
        if dir.join(py).is_file() {
            return Ok(StartPlan::Shell(format!("python3 {py}")));
        }
    }

    for (probe, root) in [
        ("index.html", ""),
        ("public/index.html", "public"),
        ("src/index.html", "src"),
    ] {
        if dir.join(probe).is_file() {
            let root_dir = if root.is_empty() {
                dir.to_path_buf()
            } else {
                dir.join(root)
            };
            return Ok(StartPlan::StaticDir(root_dir));
        }
    }

    for js in ["index.js", "server.js"] {
        if dir.join(js).is_file() {
            return Ok(StartPlan::Shell(format!("node {js}")));
        }
    }

    anyhow::bail!("no entry point found in {}", dir.display())
}

fn port_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0):(\d{2,5})",
            r"(?i)Local:\s+https?://[^\s:]+:(\d{2,5})",
            r"(?i)(?:listening|running|started|ready)\b[^\n]*?\bon\b[^\n]*?(\d{2,5})",
            r"(?i)\bport\s+(\d{2,5})",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("port pattern"))
        .collect()
    })
}

/// Scrape a port number out of one subprocess output line.
pub fn parse_port_from_line(line: &str) -> Option<u16> {
    for pat in port_patterns() {
        if let Some(cap) = pat.captures(line) {
            if let Ok(port) = cap[1].parse::<u16>() {
                if port >= 80 {
                    return Some(port);
                }
            }
        }
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
