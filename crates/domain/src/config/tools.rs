use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyProfile {
    #[default]
    Open,
    /// `shell` and `web` require an explicit allow entry.
    Strict,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub profile: PolicyProfile,
    /// When non-empty, only these tools may run.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Always denied, regardless of the allow list.
    #[serde(default)]
    pub denied_tools: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-tool settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Commands must start with one of these (empty = any).
    #[serde(default)]
    pub allow_command_prefixes: Vec<String>,
    #[serde(default = "d_deny_prefixes")]
    pub deny_command_prefixes: Vec<String>,
    #[serde(default = "d_shell_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "d_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            allow_command_prefixes: Vec::new(),
            deny_command_prefixes: d_deny_prefixes(),
            timeout_ms: d_shell_timeout_ms(),
            max_buffer_bytes: d_max_buffer_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "d_web_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "d_web_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "d_web_max_text_chars")]
    pub max_text_chars: usize,
    /// SERP endpoint for the `search` action; unset = search unavailable.
    #[serde(default)]
    pub search_base_url: Option<String>,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            timeout_ms: d_web_timeout_ms(),
            max_bytes: d_web_max_bytes(),
            max_text_chars: d_web_max_text_chars(),
            search_base_url: None,
            user_agent: d_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory scanned at startup for `*.tool.json` custom tools.
    #[serde(default)]
    pub custom_dir: Option<PathBuf>,
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls_per_turn: u32,
    /// Write redacted tool-trace records.
    #[serde(default = "d_true")]
    pub traces: bool,
    #[serde(default)]
    pub policy: ToolPolicy,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub web: WebConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            custom_dir: None,
            max_tool_calls_per_turn: d_max_tool_calls(),
            traces: true,
            policy: ToolPolicy::default(),
            shell: ShellConfig::default(),
            web: WebConfig::default(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_deny_prefixes() -> Vec<String> {
    vec![
        "rm -rf /".into(),
        "shutdown".into(),
        "reboot".into(),
        "mkfs".into(),
        "dd if=".into(),
    ]
}
fn d_shell_timeout_ms() -> u64 {
    30_000
}
fn d_max_buffer_bytes() -> usize {
    200_000
}
fn d_web_timeout_ms() -> u64 {
    20_000
}
fn d_web_max_bytes() -> usize {
    5_000_000
}
fn d_web_max_text_chars() -> usize {
    250_000
}
fn d_user_agent() -> String {
    "drost-gateway/0.3".into()
}
fn d_max_tool_calls() -> u32 {
    10
}
fn d_true() -> bool {
    true
}
