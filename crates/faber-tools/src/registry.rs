// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::{Tool, ToolCall, ToolContext, ToolOutput};

/// A tool schema as serialized to the model.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
///
/// The catalogue is a closed set keyed by name; the schema each tool
/// declares is both serialized to the model and used to validate inputs.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// True when `name` is registered and read-only (available in plan mode).
    pub fn is_read_only(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.read_only()).unwrap_or(false)
    }

    /// Schemas for all registered tools, sorted by name for a stable
    /// serialization order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Schemas for the read-only subset (plan mode).
    pub fn read_only_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| t.read_only())
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Dispatch one call.  Unknown names and panics become error outputs —
    /// the turn never dies because of a tool.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };
        let tool = Arc::clone(tool);
        let call2 = call.clone();
        let ctx2 = ctx.clone();
        match tokio::spawn(async move { tool.execute(&call2, &ctx2).await }).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %call.name, "tool execution panicked: {e}");
                ToolOutput::err(&call.id, format!("Tool error: {e}"))
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The full builtin catalogue.
pub fn standard_registry() -> ToolRegistry {
    use crate::builtin::*;

    let mut reg = ToolRegistry::new();
    // File ops
    reg.register(ReadFileTool);
    reg.register(ReadMultipleFilesTool);
    reg.register(WriteFileTool);
    reg.register(EditFileTool);
    reg.register(ListFilesTool);
    reg.register(SearchFilesTool);
    reg.register(CreateDirectoryTool);
    reg.register(DeleteFileTool);
    // Execution
    reg.register(ExecuteCommandTool);
    reg.register(RunTestTool);
    reg.register(InstallPackageTool);
    reg.register(RunDiagnosticsTool);
    // Informational
    reg.register(ReadLogsTool);
    reg.register(WebSearchTool);
    // State
    reg.register(TaskListTool);
    reg.register(CheckpointTool);
    reg.register(ManageDatabaseTool);
    reg.register(ManageEnvTool);
    reg.register(GitTool);
    // Scaffolding & analysis
    reg.register(ScaffoldProjectTool);
    reg.register(AuditDependenciesTool);
    reg.register(AnalyzeImportsTool);
    reg.register(TakeScreenshotTool);
    reg
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
