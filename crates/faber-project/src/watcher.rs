// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-project filesystem watcher shared across N subscribers.
//!
//! One `notify` recursive watcher exists per project directory, reference
//! counted by subscriptions.  Raw events are coalesced (a path must be quiet
//! for 300 ms before its change is emitted) so editors that write in bursts
//! produce a single `file_change` per save.  When the last subscriber drops,
//! the watcher is closed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Quiet period before a changed path is reported.
const COALESCE_WINDOW: Duration = Duration::from_millis(300);
/// How often pending changes are checked for stability.
const FLUSH_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, serde::Serialize)]
pub struct FileChangeEvent {
    /// `create`, `modify`, or `remove`.
    pub event_type: String,
    /// Path relative to the project root.
    pub filename: String,
    pub timestamp: DateTime<Utc>,
}

struct WatchEntry {
    refcount: usize,
    tx: broadcast::Sender<FileChangeEvent>,
    /// Held so the OS watch lives exactly as long as the entry.
    _watcher: notify::RecommendedWatcher,
    flusher: tokio::task::JoinHandle<()>,
}

/// Multiplexes filesystem events on per-project watcher instances.
#[derive(Default)]
pub struct WatchHub {
    entries: Mutex<HashMap<PathBuf, WatchEntry>>,
}

impl WatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to file changes under `project_dir`.  The first subscriber
    /// creates the watcher; later ones share it.  Dropping the returned
    /// subscription releases the reference.
    pub fn subscribe(
        self: &Arc<Self>,
        project_dir: &Path,
    ) -> anyhow::Result<WatchSubscription> {
        let project_dir = project_dir
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("cannot watch {}: {e}", project_dir.display()))?;

        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&project_dir) {
            entry.refcount += 1;
            return Ok(WatchSubscription {
                hub: Arc::clone(self),
                project: project_dir,
                rx: entry.tx.subscribe(),
            });
        }

        let (events_tx, _) = broadcast::channel(256);
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<(PathBuf, String)>();

        let root = project_dir.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            let kind = match event.kind {
                notify::EventKind::Create(_) => "create",
                notify::EventKind::Modify(_) => "modify",
                notify::EventKind::Remove(_) => "remove",
                _ => return,
            };
            for path in event.paths {
                if is_ignored(&path, &root) {
                    continue;
                }
                let _ = raw_tx.send((path, kind.to_string()));
            }
        })?;
        watcher.watch(&project_dir, RecursiveMode::Recursive)?;

        let flusher = tokio::spawn(coalesce_loop(
            project_dir.clone(),
            raw_rx,
            events_tx.clone(),
        ));

        debug!(project = %project_dir.display(), "watcher created");
        let rx = events_tx.subscribe();
        entries.insert(
            project_dir.clone(),
            WatchEntry {
                refcount: 1,
                tx: events_tx,
                _watcher: watcher,
                flusher,
            },
        );

        Ok(WatchSubscription {
            hub: Arc::clone(self),
            project: project_dir,
            rx,
        })
    }

    fn release(&self, project: &Path) {
        let mut entries = self.entries.lock().unwrap();
        let remove = match entries.get_mut(project) {
            Some(entry) => {
                entry.refcount -= 1;
                entry.refcount == 0
            }
            None => false,
        };
        if remove {
            if let Some(entry) = entries.remove(project) {
                entry.flusher.abort();
                debug!(project = %project.display(), "watcher closed");
            }
        }
    }

    /// Number of live watchers (for diagnostics and tests).
    pub fn watcher_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// A live subscription; dropping it releases the shared watcher reference.
pub struct WatchSubscription {
    hub: Arc<WatchHub>,
    project: PathBuf,
    rx: broadcast::Receiver<FileChangeEvent>,
}

impl WatchSubscription {
    pub async fn recv(&mut self) -> Option<FileChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "file-change subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.hub.release(&self.project);
    }
}

/// Buffer raw events per path; emit once a path has been quiet for the
/// coalescing window.
async fn coalesce_loop(
    root: PathBuf,
    mut raw_rx: mpsc::UnboundedReceiver<(PathBuf, String)>,
    tx: broadcast::Sender<FileChangeEvent>,
) {
    let mut pending: HashMap<PathBuf, (String, tokio::time::Instant)> = HashMap::new();
    let mut tick = tokio::time::interval(FLUSH_TICK);

    loop {
        tokio::select! {
            raw = raw_rx.recv() => {
                match raw {
                    Some((path, kind)) => {
                        pending.insert(path, (kind, tokio::time::Instant::now()));
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                let now = tokio::time::Instant::now();
                let ready: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, (_, seen))| now.duration_since(*seen) >= COALESCE_WINDOW)
                    .map(|(p, _)| p.clone())
                    .collect();
                for path in ready {
                    let (kind, _) = pending.remove(&path).expect("key present");
                    let filename = path
                        .strip_prefix(&root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .to_string();
                    let _ = tx.send(FileChangeEvent {
                        event_type: kind,
                        filename,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }
}

/// Ignore filter: node_modules, .git, __pycache__, and dotfile components.
fn is_ignored(path: &Path, root: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name == "node_modules" || name == "__pycache__" || name.starts_with('.')
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ignore_filter_matches_spec_set() {
        let root = Path::new("/p");
        assert!(is_ignored(Path::new("/p/node_modules/x.js"), root));
        assert!(is_ignored(Path::new("/p/.git/HEAD"), root));
        assert!(is_ignored(Path::new("/p/src/__pycache__/m.pyc"), root));
        assert!(is_ignored(Path::new("/p/.env"), root));
        assert!(!is_ignored(Path::new("/p/src/app.js"), root));
    }

    #[tokio::test]
    async fn subscribers_share_one_watcher() {
        let dir = TempDir::new().unwrap();
        let hub = Arc::new(WatchHub::new());
        let sub_a = hub.subscribe(dir.path()).unwrap();
        let sub_b = hub.subscribe(dir.path()).unwrap();
        assert_eq!(hub.watcher_count(), 1);
        drop(sub_a);
        assert_eq!(hub.watcher_count(), 1);
        drop(sub_b);
        assert_eq!(hub.watcher_count(), 0);
    }

    #[tokio::test]
    async fn distinct_projects_get_distinct_watchers() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let hub = Arc::new(WatchHub::new());
        let _sa = hub.subscribe(a.path()).unwrap();
        let _sb = hub.subscribe(b.path()).unwrap();
        assert_eq!(hub.watcher_count(), 2);
    }

    #[tokio::test]
    async fn write_produces_coalesced_event() {
        let dir = TempDir::new().unwrap();
        let hub = Arc::new(WatchHub::new());
        let mut sub = hub.subscribe(dir.path()).unwrap();

        // Two writes in quick succession should coalesce to one event.
        std::fs::write(dir.path().join("x.txt"), "1").unwrap();
        std::fs::write(dir.path().join("x.txt"), "12").unwrap();

        let ev = tokio::time::timeout(Duration::from_secs(3), sub.recv())
            .await
            .expect("no event within deadline")
            .expect("channel closed");
        assert_eq!(ev.filename, "x.txt");
        assert!(ev.event_type == "create" || ev.event_type == "modify");

        // The coalescing window should have merged the burst; no second
        // event for the same path arrives immediately after.
        let extra = tokio::time::timeout(Duration::from_millis(150), sub.recv()).await;
        assert!(extra.is_err(), "burst writes were not coalesced");
    }
}
