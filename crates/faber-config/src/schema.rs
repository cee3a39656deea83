// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

/// The conversation mode the agent operates in.
///
/// `Plan` restricts the tool set to read-only operations and asks the model
/// for a numbered implementation plan; `Build` grants the full catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Plan,
    #[default]
    Build,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Plan => "plan",
            Mode::Build => "build",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plan" => Ok(Mode::Plan),
            "build" => Ok(Mode::Build),
            other => anyhow::bail!("unknown mode: {other}"),
        }
    }
}

/// Singleton settings record (persistence id = 1).
///
/// External service tokens are carried opaquely — the engine never inspects
/// them, it only forwards them to the collaborator that owns the capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the OpenAI-compatible endpoint, e.g.
    /// `http://localhost:1234/v1`.  The client appends `/chat/completions`.
    #[serde(default = "default_endpoint")]
    pub endpoint_url: String,
    /// Model id forwarded to the endpoint.  Empty string lets the server pick.
    #[serde(default)]
    pub model_name: String,
    /// Default conversation mode for new turns.
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// When true, turns route through the planner/coder loop instead of the
    /// single-agent loop.
    #[serde(default)]
    pub dual_model_enabled: bool,
    /// Model id for the Planner role.  Falls back to `model_name` when empty.
    #[serde(default)]
    pub planner_model_name: String,
    /// Model id for the Coder role.  Falls back to `model_name` when empty.
    #[serde(default)]
    pub coder_model_name: String,
    /// Opaque token for the remote-file collaborator (never logged).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_token: Option<String>,
    /// Opaque token for the web-search collaborator (never logged).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_token: Option<String>,
    #[serde(default)]
    pub limits: LoopLimits,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

fn default_endpoint() -> String {
    "http://localhost:1234/v1".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint(),
            model_name: String::new(),
            mode: Mode::default(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            dual_model_enabled: false,
            planner_model_name: String::new(),
            coder_model_name: String::new(),
            remote_file_token: None,
            search_token: None,
            limits: LoopLimits::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Settings {
    /// Effective Planner model: the dedicated name or the shared default.
    pub fn planner_model(&self) -> &str {
        if self.planner_model_name.is_empty() {
            &self.model_name
        } else {
            &self.planner_model_name
        }
    }

    /// Effective Coder model: the dedicated name or the shared default.
    pub fn coder_model(&self) -> &str {
        if self.coder_model_name.is_empty() {
            &self.model_name
        } else {
            &self.coder_model_name
        }
    }
}

/// Iteration ceilings for the agent loops.
///
/// The defaults match the hard ceilings the loops were designed around;
/// raising them trades latency and token cost for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopLimits {
    /// Single-agent loop: model round-trips per turn.
    #[serde(default = "default_single_iterations")]
    pub max_iterations: u32,
    /// Dual-agent loop: Coder round-trips per task.
    #[serde(default = "default_task_iterations")]
    pub max_iterations_per_task: u32,
    /// Dual-agent loop: Coder round-trips across all tasks of a turn.
    #[serde(default = "default_overall_iterations")]
    pub max_iterations_overall: u32,
}

fn default_single_iterations() -> u32 {
    25
}
fn default_task_iterations() -> u32 {
    30
}
fn default_overall_iterations() -> u32 {
    100
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: default_single_iterations(),
            max_iterations_per_task: default_task_iterations(),
            max_iterations_overall: default_overall_iterations(),
        }
    }
}

/// Sandbox behaviour for tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// When true (the default), all tool paths must resolve under the
    /// project directory.  This is hygiene against a confused model, not a
    /// security boundary.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
