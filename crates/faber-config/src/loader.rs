// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Settings;

/// Config file locations, lowest priority first.  Every discovered file is
/// merged over the previous ones, so a workspace-local `faber.yaml` wins
/// over the user config, which wins over `/etc`.
fn search_paths() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = vec![PathBuf::from("/etc/faber")];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".config/faber"));
    }
    if let Some(cfg) = dirs::config_dir() {
        roots.push(cfg.join("faber"));
    }
    roots.push(PathBuf::from(".faber"));

    let mut paths: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| ["config.yaml", "config.yml"].map(|f| root.join(f)))
        .collect();
    paths.push(PathBuf::from("faber.yaml"));
    paths.push(PathBuf::from("faber.yml"));
    paths
}

/// Parse one YAML layer from disk.
fn read_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Load settings by merging every discovered YAML file, then an optional
/// explicit `extra` path from the caller, then environment overrides
/// (`FABER_ENDPOINT_URL`, `FABER_MODEL`).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Settings> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in search_paths() {
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "loading config layer");
        merge_into(&mut merged, read_layer(&path)?);
    }
    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_into(&mut merged, read_layer(p)?);
    }

    // An empty merge (no config files anywhere) is the defaults, not an error.
    let mut settings: Settings = match &merged {
        serde_yaml::Value::Mapping(m) if m.is_empty() => Settings::default(),
        _ => serde_yaml::from_value(merged).unwrap_or_default(),
    };

    for (var, field) in [
        ("FABER_ENDPOINT_URL", &mut settings.endpoint_url),
        ("FABER_MODEL", &mut settings.model_name),
    ] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                *field = value;
            }
        }
    }

    Ok(settings)
}

/// Deep-merge `layer` over `base`; the layer wins on scalar conflicts while
/// mapping keys absent from the layer survive.
fn merge_into(base: &mut serde_yaml::Value, layer: serde_yaml::Value) {
    match (base, layer) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(layer_map)) => {
            for (key, value) in layer_map {
                let slot = base_map
                    .entry(key)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_into(slot, value);
            }
        }
        (base, layer) => *base = layer,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn layer_wins_on_scalar_conflict() {
        let mut base = yaml("max_tokens: 4096");
        merge_into(&mut base, yaml("max_tokens: 512"));
        assert_eq!(base["max_tokens"].as_i64(), Some(512));
    }

    #[test]
    fn keys_absent_from_layer_survive() {
        let mut base = yaml("model_name: m1\ntemperature: 0.7");
        merge_into(&mut base, yaml("temperature: 0.1"));
        assert_eq!(base["model_name"].as_str(), Some("m1"));
        assert_eq!(base["temperature"].as_f64(), Some(0.1));
    }

    #[test]
    fn nested_sections_merge_recursively() {
        let mut base = yaml("limits:\n  max_iterations: 25\n  max_iterations_overall: 100");
        merge_into(&mut base, yaml("limits:\n  max_iterations: 10"));
        assert_eq!(base["limits"]["max_iterations"].as_i64(), Some(10));
        assert_eq!(base["limits"]["max_iterations_overall"].as_i64(), Some(100));
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        assert!(load(Some(Path::new("/tmp/faber_no_such_config.yaml"))).is_err());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "endpoint_url: http://box:9999/v1\nmodel_name: test-model").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.endpoint_url, "http://box:9999/v1");
        assert_eq!(cfg.model_name, "test-model");
    }

    #[test]
    fn unset_fields_keep_their_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "model_name: test-model").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.max_tokens, 4096);
        assert_eq!(cfg.limits.max_iterations, 25);
    }

    #[test]
    fn search_paths_cover_etc_home_and_workspace() {
        let paths = search_paths();
        assert!(paths.iter().any(|p| p.starts_with("/etc/faber")));
        assert!(paths.iter().any(|p| p.ends_with("faber.yaml")));
    }
}
