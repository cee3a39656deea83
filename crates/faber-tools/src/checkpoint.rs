// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! On-disk project snapshots under `<project>/.checkpoints/`.
//!
//! A checkpoint is a bounded copy of the project tree: files over 1 MiB,
//! dotfiles, `node_modules`, `.git` and the checkpoint directory itself are
//! excluded, and a snapshot holds at most 500 files.  Each snapshot carries
//! a `.manifest.json` describing what was captured.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

pub const CHECKPOINTS_DIR: &str = ".checkpoints";

/// Per-file size ceiling for inclusion in a snapshot.
const MAX_FILE_BYTES: u64 = 1024 * 1024;
/// Snapshot-wide file-count cap.
const MAX_FILES: usize = 500;

const MANIFEST_FILE: &str = ".manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub file_count: usize,
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    project_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }

    fn checkpoints_root(&self) -> PathBuf {
        self.project_dir.join(CHECKPOINTS_DIR)
    }

    /// Create a snapshot.  `name` becomes part of the directory id:
    /// `cp-<name>-<millis>` (or `cp-<millis>` when unnamed).
    pub fn create(&self, name: &str) -> anyhow::Result<CheckpointManifest> {
        let ts = Utc::now().timestamp_millis();
        let id = if name.is_empty() {
            format!("cp-{ts}")
        } else {
            format!("cp-{}-{ts}", slugify(name))
        };
        let snapshot_dir = self.checkpoints_root().join(&id);
        std::fs::create_dir_all(&snapshot_dir)
            .with_context(|| format!("creating {}", snapshot_dir.display()))?;

        let mut entries = Vec::new();
        for item in WalkDir::new(&self.project_dir)
            .into_iter()
            .filter_entry(|e| !is_excluded(e.path(), &self.project_dir))
        {
            let item = match item {
                Ok(i) => i,
                Err(_) => continue,
            };
            if !item.file_type().is_file() {
                continue;
            }
            if entries.len() >= MAX_FILES {
                break;
            }
            let meta = match item.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.len() > MAX_FILE_BYTES {
                continue;
            }
            let rel = match item.path().strip_prefix(&self.project_dir) {
                Ok(r) => r.to_path_buf(),
                Err(_) => continue,
            };
            let dest = snapshot_dir.join(&rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(item.path(), &dest)
                .with_context(|| format!("copying {}", rel.display()))?;
            entries.push(ManifestEntry {
                relative_path: rel.to_string_lossy().to_string(),
                size: meta.len(),
            });
        }

        let manifest = CheckpointManifest {
            id: id.clone(),
            name: name.to_string(),
            created_at: Utc::now().to_rfc3339(),
            file_count: entries.len(),
            files: entries,
        };
        let manifest_path = snapshot_dir.join(MANIFEST_FILE);
        std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("writing {}", manifest_path.display()))?;
        Ok(manifest)
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Vec<CheckpointManifest> {
        let root = self.checkpoints_root();
        let Ok(entries) = std::fs::read_dir(&root) else {
            return Vec::new();
        };
        let mut manifests: Vec<CheckpointManifest> = entries
            .flatten()
            .filter_map(|e| {
                let text = std::fs::read_to_string(e.path().join(MANIFEST_FILE)).ok()?;
                serde_json::from_str(&text).ok()
            })
            .collect();
        manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        manifests
    }

    /// Copy the files of checkpoint `id` back over the project tree.
    ///
    /// Files created after the snapshot was taken are left in place — the
    /// project may contain extra files after a rollback.  This is
    /// intentional: deleting unknown files would destroy work the snapshot
    /// never saw.
    ///
    /// Returns the number of files restored.
    pub fn rollback(&self, id: &str) -> anyhow::Result<usize> {
        let snapshot_dir = self.checkpoints_root().join(id);
        let manifest_text = std::fs::read_to_string(snapshot_dir.join(MANIFEST_FILE))
            .with_context(|| format!("no checkpoint '{id}'"))?;
        let manifest: CheckpointManifest =
            serde_json::from_str(&manifest_text).context("corrupt checkpoint manifest")?;

        let mut restored = 0;
        for entry in &manifest.files {
            let src = snapshot_dir.join(&entry.relative_path);
            let dest = self.project_dir.join(&entry.relative_path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if std::fs::copy(&src, &dest).is_ok() {
                restored += 1;
            }
        }
        Ok(restored)
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Exclusion filter for snapshot capture: `node_modules`, `.git`, the
/// checkpoint directory itself, and any dotfile component.
fn is_excluded(path: &Path, root: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    for comp in rel.components() {
        let name = comp.as_os_str().to_string_lossy();
        if name == "node_modules" || name.starts_with('.') {
            return true;
        }
    }
    false
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, CheckpointStore) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.js"), "console.log(1)").unwrap();
        let store = CheckpointStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn create_captures_files_and_manifest() {
        let (_d, store) = project();
        let m = store.create("pre-build").unwrap();
        assert!(m.id.starts_with("cp-pre-build-"));
        assert_eq!(m.file_count, 2);
        assert!(m
            .files
            .iter()
            .any(|f| f.relative_path == "src/main.js"));
    }

    #[test]
    fn dotfiles_and_node_modules_are_excluded() {
        let (d, store) = project();
        std::fs::write(d.path().join(".env"), "SECRET=1").unwrap();
        std::fs::create_dir_all(d.path().join("node_modules/x")).unwrap();
        std::fs::write(d.path().join("node_modules/x/i.js"), "x").unwrap();
        let m = store.create("t").unwrap();
        assert!(m.files.iter().all(|f| !f.relative_path.contains("node_modules")));
        assert!(m.files.iter().all(|f| !f.relative_path.starts_with('.')));
    }

    #[test]
    fn oversized_files_are_skipped() {
        let (d, store) = project();
        let big = vec![b'x'; (MAX_FILE_BYTES + 1) as usize];
        std::fs::write(d.path().join("big.bin"), big).unwrap();
        let m = store.create("t").unwrap();
        assert!(m.files.iter().all(|f| f.relative_path != "big.bin"));
    }

    #[test]
    fn snapshots_do_not_recurse_into_checkpoints() {
        let (_d, store) = project();
        store.create("one").unwrap();
        let m = store.create("two").unwrap();
        assert!(m
            .files
            .iter()
            .all(|f| !f.relative_path.contains(CHECKPOINTS_DIR)));
    }

    #[test]
    fn rollback_restores_content() {
        let (d, store) = project();
        let m = store.create("snap").unwrap();
        std::fs::write(d.path().join("a.txt"), "mutated").unwrap();
        let restored = store.rollback(&m.id).unwrap();
        assert!(restored >= 1);
        assert_eq!(std::fs::read_to_string(d.path().join("a.txt")).unwrap(), "alpha");
    }

    #[test]
    fn rollback_keeps_files_created_after_snapshot() {
        let (d, store) = project();
        let m = store.create("snap").unwrap();
        std::fs::write(d.path().join("later.txt"), "new").unwrap();
        store.rollback(&m.id).unwrap();
        assert!(d.path().join("later.txt").exists());
    }

    #[test]
    fn rollback_unknown_id_fails() {
        let (_d, store) = project();
        assert!(store.rollback("cp-nope").is_err());
    }

    #[test]
    fn list_returns_newest_first() {
        let (_d, store) = project();
        let a = store.create("first").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store.create("second").unwrap();
        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }
}
