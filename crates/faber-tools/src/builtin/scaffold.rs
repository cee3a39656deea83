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

const TEMPLATES: &[&str] = &["react", "express-api", "fullstack", "node-cli", "static"];

/// Write a project skeleton from a closed template set, then install
/// dependencies.
pub struct ScaffoldProjectTool;

#[async_trait]
impl Tool for ScaffoldProjectTool {
    fn name(&self) -> &str {
        "scaffold_project"
    }

    fn description(&self) -> &str {
        "Generate a project skeleton. template: react | express-api | \
         fullstack | node-cli | static. Optional features: typescript, \
         tailwind, docker. Writes the files and runs npm install. Only use \
         this in an empty project."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "template": {
                    "type": "string",
                    "enum": TEMPLATES,
                    "description": "Which skeleton to generate"
                },
                "features": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["typescript", "tailwind", "docker"] },
                    "description": "Optional feature add-ons"
                }
            },
            "required": ["template"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(template) = call.args.get("template").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'template'");
        };
        if !TEMPLATES.contains(&template) {
            return ToolOutput::err(
                &call.id,
                format!("unknown template '{template}' (expected one of {TEMPLATES:?})"),
            );
        }
        let features: Vec<String> = call
            .args
            .get("features")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let typescript = features.iter().any(|f| f == "typescript");
        let tailwind = features.iter().any(|f| f == "tailwind");
        let docker = features.iter().any(|f| f == "docker");

        debug!(template, ?features, "scaffolding project");

        let files = match template {
            "react" => react_files(typescript, tailwind),
            "express-api" => express_files(typescript),
            "fullstack" => {
                let mut f = react_files(typescript, tailwind);
                f.extend(express_files(typescript));
                f
            }
            "node-cli" => node_cli_files(typescript),
            "static" => static_files(),
            _ => unreachable!("validated above"),
        };

        let mut written = Vec::with_capacity(files.len() + 1);
        for (rel, content) in &files {
            let path = ctx.working_dir.join(rel);
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return ToolOutput::err(&call.id, format!("Tool error: {e}"));
                }
            }
            if let Err(e) = std::fs::write(&path, content) {
                return ToolOutput::err(&call.id, format!("cannot write {rel}: {e}"));
            }
            written.push(rel.clone());
        }

        if docker {
            let dockerfile = dockerfile_for(template);
            if std::fs::write(ctx.working_dir.join("Dockerfile"), dockerfile).is_ok() {
                written.push("Dockerfile".to_string());
            }
        }

        // Static sites have no dependencies to install.
        let install_note = if template == "static" {
            String::new()
        } else {
            match npm_install(ctx).await {
                Ok(()) => "\nDependencies installed.".to_string(),
                Err(e) => format!("\nnpm install did not complete: {e}"),
            }
        };

        ToolOutput::ok(
            &call.id,
            format!(
                "Scaffolded {template} project with {} files:\n{}{install_note}",
                written.len(),
                written.join("\n")
            ),
        )
    }
}

async fn npm_install(ctx: &ToolContext) -> Result<(), String> {
    let result = tokio::time::timeout(
        INSTALL_TIMEOUT,
        Command::new("npm")
            .arg("install")
            .current_dir(&ctx.working_dir)
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await;
    match result {
        Ok(Ok(out)) if out.status.success() => Ok(()),
        Ok(Ok(out)) => Err(String::from_utf8_lossy(&out.stderr).trim().to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("timed out".to_string()),
    }
}

type FileSet = Vec<(String, String)>;

fn pkg_json(name: &str, extra: Value) -> String {
    let mut pkg = json!({
        "name": name,
        "version": "1.0.0",
        "private": true
    });
    if let (Some(obj), Some(extra)) = (pkg.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    format!("{pkg:#}")
}

fn react_files(typescript: bool, tailwind: bool) -> FileSet {
    let ext = if typescript { "tsx" } else { "jsx" };
    let deps = json!({
        "react": "^18.3.0",
        "react-dom": "^18.3.0"
    });
    let mut dev_deps = json!({
        "vite": "^5.4.0",
        "@vitejs/plugin-react": "^4.3.0"
    });
    if typescript {
        dev_deps["typescript"] = json!("^5.5.0");
    }
    if tailwind {
        dev_deps["tailwindcss"] = json!("^3.4.0");
        dev_deps["autoprefixer"] = json!("^10.4.0");
        dev_deps["postcss"] = json!("^8.4.0");
    }
    let css = if tailwind {
        "@tailwind base;\n@tailwind components;\n@tailwind utilities;\n"
    } else {
        "body { font-family: sans-serif; margin: 2rem; }\n"
    };

    let mut files: FileSet = vec![
        (
            "package.json".into(),
            pkg_json(
                "react-app",
                json!({
                    "scripts": { "dev": "vite", "build": "vite build" },
                    "dependencies": deps,
                    "devDependencies": dev_deps
                }),
            ),
        ),
        (
            "index.html".into(),
            format!(
                "<!doctype html>\n<html>\n  <head><meta charset=\"utf-8\"><title>App</title></head>\n  <body>\n    <div id=\"root\"></div>\n    <script type=\"module\" src=\"/src/main.{ext}\"></script>\n  </body>\n</html>\n"
            ),
        ),
        (
            "vite.config.js".into(),
            "import { defineConfig } from 'vite';\nimport react from '@vitejs/plugin-react';\n\nexport default defineConfig({\n  plugins: [react()],\n});\n".into(),
        ),
        (
            format!("src/main.{ext}"),
            format!(
                "import React from 'react';\nimport {{ createRoot }} from 'react-dom/client';\nimport App from './App.{ext}';\nimport './index.css';\n\ncreateRoot(document.getElementById('root')).render(<App />);\n"
            ),
        ),
        (
            format!("src/App.{ext}"),
            "import React from 'react';\n\nexport default function App() {\n  return <h1>Hello from React</h1>;\n}\n".into(),
        ),
        ("src/index.css".into(), css.into()),
    ];
    if tailwind {
        files.push((
            "tailwind.config.js".into(),
            "export default {\n  content: ['./index.html', './src/**/*.{js,jsx,ts,tsx}'],\n  theme: { extend: {} },\n  plugins: [],\n};\n".into(),
        ));
        files.push((
            "postcss.config.js".into(),
            "export default {\n  plugins: { tailwindcss: {}, autoprefixer: {} },\n};\n".into(),
        ));
    }
    if typescript {
        files.push((
            "tsconfig.json".into(),
            "{\n  \"compilerOptions\": {\n    \"target\": \"ES2020\",\n    \"jsx\": \"react-jsx\",\n    \"module\": \"ESNext\",\n    \"moduleResolution\": \"bundler\",\n    \"strict\": true,\n    \"noEmit\": true\n  },\n  \"include\": [\"src\"]\n}\n".into(),
        ));
    }
    files
}

fn express_files(typescript: bool) -> FileSet {
    let mut dev_deps = json!({ "nodemon": "^3.1.0" });
    if typescript {
        dev_deps["typescript"] = json!("^5.5.0");
        dev_deps["@types/express"] = json!("^4.17.0");
    }
    vec![
        (
            "package.json".into(),
            pkg_json(
                "express-api",
                json!({
                    "main": "server.js",
                    "scripts": { "start": "node server.js", "dev": "nodemon server.js" },
                    "dependencies": { "express": "^4.19.0" },
                    "devDependencies": dev_deps
                }),
            ),
        ),
        (
            "server.js".into(),
            "const express = require('express');\n\nconst app = express();\nconst port = process.env.PORT || 3000;\n\napp.use(express.json());\n\napp.get('/health', (req, res) => {\n  res.json({ status: 'ok' });\n});\n\napp.listen(port, () => {\n  console.log(`Listening on port ${port}`);\n});\n".into(),
        ),
    ]
}

fn node_cli_files(typescript: bool) -> FileSet {
    let mut dev_deps = json!({});
    if typescript {
        dev_deps["typescript"] = json!("^5.5.0");
    }
    vec![
        (
            "package.json".into(),
            pkg_json(
                "node-cli",
                json!({
                    "main": "index.js",
                    "bin": { "cli": "./index.js" },
                    "scripts": { "start": "node index.js" },
                    "devDependencies": dev_deps
                }),
            ),
        ),
        (
            "index.js".into(),
            "#!/usr/bin/env node\n\nconst args = process.argv.slice(2);\n\nif (args.includes('--help')) {\n  console.log('usage: cli [options]');\n  process.exit(0);\n}\n\nconsole.log('Hello from the CLI');\n".into(),
        ),
    ]
}

fn static_files() -> FileSet {
    vec![
        (
            "index.html".into(),
            "<!doctype html>\n<html>\n  <head>\n    <meta charset=\"utf-8\">\n    <title>Static Site</title>\n    <link rel=\"stylesheet\" href=\"style.css\">\n  </head>\n  <body>\n    <h1>Hello</h1>\n    <script src=\"main.js\"></script>\n  </body>\n</html>\n".into(),
        ),
        ("style.css".into(), "body { font-family: sans-serif; margin: 2rem; }\n".into()),
        ("main.js".into(), "console.log('ready');\n".into()),
    ]
}

fn dockerfile_for(template: &str) -> String {
    match template {
        "static" => "FROM nginx:alpine\nCOPY . /usr/share/nginx/html\n".to_string(),
        _ => "FROM node:20-alpine\nWORKDIR /app\nCOPY package*.json ./\nRUN npm ci\nCOPY . .\nEXPOSE 3000\nCMD [\"npm\", \"start\"]\n".to_string(),
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
            name: "scaffold_project".into(),
            args,
        }
    }

    #[tokio::test]
    async fn static_template_needs_no_npm() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ScaffoldProjectTool
            .execute(&call(json!({"template": "static"})), &ctx)
            .await;
        assert!(out.success, "{}", out.result);
        assert!(dir.path().join("index.html").exists());
        assert!(dir.path().join("style.css").exists());
        assert!(!out.result.contains("npm install did not complete"));
    }

    #[tokio::test]
    async fn unknown_template_is_refused() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ScaffoldProjectTool
            .execute(&call(json!({"template": "django"})), &ctx)
            .await;
        assert!(!out.success);
    }

    #[test]
    fn react_typescript_adds_tsconfig_and_tsx() {
        let files = react_files(true, false);
        assert!(files.iter().any(|(p, _)| p == "tsconfig.json"));
        assert!(files.iter().any(|(p, _)| p == "src/App.tsx"));
    }

    #[test]
    fn react_tailwind_adds_configs() {
        let files = react_files(false, true);
        assert!(files.iter().any(|(p, _)| p == "tailwind.config.js"));
        let css = &files.iter().find(|(p, _)| p == "src/index.css").unwrap().1;
        assert!(css.contains("@tailwind"));
    }

    #[test]
    fn express_server_honours_port_env() {
        let files = express_files(false);
        let server = &files.iter().find(|(p, _)| p == "server.js").unwrap().1;
        assert!(server.contains("process.env.PORT"));
    }

    #[test]
    fn docker_files_differ_by_template() {
        assert!(dockerfile_for("static").contains("nginx"));
        assert!(dockerfile_for("react").contains("node:20"));
    }
}
