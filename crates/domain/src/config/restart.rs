use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Restart policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exit status meaning "respawn me with the latest on-disk state".
/// An external supervisor treats exactly this code as a restart request.
pub const RESTART_EXIT_CODE: i32 = 86;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Maximum restarts inside the rolling window.
    #[serde(default = "d_max_restarts")]
    pub max_restarts: usize,
    #[serde(default = "d_window_secs")]
    pub window_secs: u64,
    /// Self-modification restarts skip the approval gate.
    #[serde(default = "d_true")]
    pub allow_self_mod: bool,
    /// Require explicit approval for manual/signal restarts.
    #[serde(default)]
    pub require_approval: bool,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: d_max_restarts(),
            window_secs: d_window_secs(),
            allow_self_mod: true,
            require_approval: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_restarts() -> usize {
    5
}
fn d_window_secs() -> u64 {
    300
}
fn d_true() -> bool {
    true
}
