// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Regex-based import graph over the project's JS/TS sources.
///
/// This is deliberately a lexical scan, not a parser: it catches the
/// `import … from '…'` and `require('…')` forms that cover real projects,
/// and the model treats the result as a map, not ground truth.
pub struct AnalyzeImportsTool;

#[async_trait]
impl Tool for AnalyzeImportsTool {
    fn name(&self) -> &str {
        "analyze_imports"
    }

    fn description(&self) -> &str {
        "Build the import graph across .ts/.tsx/.js/.jsx/.mjs/.cjs files. \
         With 'file', reports what that file imports (dependencies) and which \
         files import it (dependents). Without it, summarizes the whole graph."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file": {
                    "type": "string",
                    "description": "Optional file to focus on, relative to the project root"
                }
            },
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let graph = build_graph(&ctx.working_dir);
        if graph.is_empty() {
            return ToolOutput::ok(&call.id, "No JavaScript/TypeScript sources found.");
        }

        match call.args.get("file").and_then(|v| v.as_str()) {
            Some(file) => {
                let file = file.trim_start_matches("./");
                let Some(deps) = graph.get(file) else {
                    return ToolOutput::err(
                        &call.id,
                        format!("'{file}' is not part of the import graph"),
                    );
                };
                let dependents: Vec<&str> = graph
                    .iter()
                    .filter(|(_, imports)| imports.iter().any(|i| resolves_to(i, file)))
                    .map(|(path, _)| path.as_str())
                    .collect();

                let mut out = format!("{file}\n\nimports ({}):\n", deps.len());
                if deps.is_empty() {
                    out.push_str("  (none)\n");
                }
                for d in deps {
                    out.push_str(&format!("  {d}\n"));
                }
                out.push_str(&format!("\nimported by ({}):\n", dependents.len()));
                if dependents.is_empty() {
                    out.push_str("  (none)\n");
                }
                for d in dependents {
                    out.push_str(&format!("  {d}\n"));
                }
                ToolOutput::ok(&call.id, out)
            }
            None => {
                let mut lines = Vec::with_capacity(graph.len());
                for (file, deps) in &graph {
                    lines.push(format!("{file} -> {} import(s)", deps.len()));
                }
                ToolOutput::ok(
                    &call.id,
                    format!("{} source files\n{}", graph.len(), lines.join("\n")),
                )
            }
        }
    }
}

fn import_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // import x from 'mod'; import 'mod'; export { x } from 'mod'
            r#"(?m)^\s*(?:import|export)\s+(?:[^'"]*?\s+from\s+)?['"]([^'"]+)['"]"#,
            // require('mod')
            r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
            // dynamic import('mod')
            r#"import\(\s*['"]([^'"]+)['"]\s*\)"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("import pattern"))
        .collect()
    })
}

/// file (relative path) → list of import specifiers found in it.
fn build_graph(root: &Path) -> BTreeMap<String, Vec<String>> {
    let mut graph = BTreeMap::new();
    for entry in WalkDir::new(root)
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
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if !SOURCE_EXTENSIONS.contains(&ext) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();

        let mut imports = Vec::new();
        for pat in import_patterns() {
            for cap in pat.captures_iter(&content) {
                let spec = cap[1].to_string();
                if !imports.contains(&spec) {
                    imports.push(spec);
                }
            }
        }
        graph.insert(rel, imports);
    }
    graph
}

/// Does import specifier `spec` (e.g. "./util" from some file) plausibly
/// refer to project file `target` (e.g. "src/util.js")?  Extension-blind
/// suffix match over the normalized specifier.
fn resolves_to(spec: &str, target: &str) -> bool {
    if !spec.starts_with('.') {
        return false;
    }
    let spec = spec.trim_start_matches("./").trim_start_matches("../");
    let target_no_ext = target
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(target);
    target_no_ext.ends_with(spec) || target.ends_with(spec)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
