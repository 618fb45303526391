use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// History budget applied on every save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryBudget {
    #[serde(default)]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub max_chars: Option<usize>,
    /// Keep leading system messages out of the trim.
    #[serde(default = "d_true")]
    pub preserve_system: bool,
}

impl Default for HistoryBudget {
    fn default() -> Self {
        Self {
            max_messages: None,
            max_chars: None,
            preserve_system: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// How long a save waits on a held session lock.
    #[serde(default = "d_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Locks older than this are considered abandoned and removed.
    #[serde(default = "d_lock_stale_ms")]
    pub lock_stale_ms: u64,
    /// Derived session keys longer than this are hashed.
    #[serde(default = "d_session_key_max_len")]
    pub session_key_max_len: usize,
    #[serde(default)]
    pub history_budget: HistoryBudget,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: d_lock_timeout_ms(),
            lock_stale_ms: d_lock_stale_ms(),
            session_key_max_len: d_session_key_max_len(),
            history_budget: HistoryBudget::default(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_lock_timeout_ms() -> u64 {
    600
}
fn d_lock_stale_ms() -> u64 {
    30_000
}
fn d_session_key_max_len() -> usize {
    120
}
fn d_true() -> bool {
    true
}
