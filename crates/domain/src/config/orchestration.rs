use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestration lanes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Admission behavior of a session's lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LaneMode {
    #[default]
    Queue,
    Interrupt,
    Collect,
    Steer,
    SteerBacklog,
}

/// What happens when a full queue receives a new submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Drop the oldest queued entry, rejecting its submitter.
    #[default]
    Old,
    /// Reject the incoming submitter.
    New,
    /// Reserved; treated as `Old`.
    Summarize,
}

/// Per-lane parameters; `overrides` keys are session ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub default_mode: LaneMode,
    #[serde(default = "d_cap")]
    pub cap: usize,
    #[serde(default)]
    pub drop_policy: DropPolicy,
    #[serde(default = "d_collect_debounce_ms")]
    pub collect_debounce_ms: u64,
    /// Persist lane state so queued inputs survive a crash.
    #[serde(default = "d_true")]
    pub persist_lanes: bool,
    #[serde(default)]
    pub overrides: HashMap<String, LaneOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaneOverride {
    #[serde(default)]
    pub mode: Option<LaneMode>,
    #[serde(default)]
    pub cap: Option<usize>,
    #[serde(default)]
    pub drop_policy: Option<DropPolicy>,
    #[serde(default)]
    pub collect_debounce_ms: Option<u64>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            default_mode: LaneMode::Queue,
            cap: d_cap(),
            drop_policy: DropPolicy::Old,
            collect_debounce_ms: d_collect_debounce_ms(),
            persist_lanes: true,
            overrides: HashMap::new(),
        }
    }
}

impl OrchestrationConfig {
    /// Effective lane parameters for a session.
    pub fn for_session(&self, session_id: &str) -> (LaneMode, usize, DropPolicy, u64) {
        match self.overrides.get(session_id) {
            Some(o) => (
                o.mode.unwrap_or(self.default_mode),
                o.cap.unwrap_or(self.cap),
                o.drop_policy.unwrap_or(self.drop_policy),
                o.collect_debounce_ms.unwrap_or(self.collect_debounce_ms),
            ),
            None => (
                self.default_mode,
                self.cap,
                self.drop_policy,
                self.collect_debounce_ms,
            ),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_cap() -> usize {
    8
}
fn d_collect_debounce_ms() -> u64 {
    400
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_layers_over_defaults() {
        let mut config = OrchestrationConfig::default();
        config.overrides.insert(
            "busy-session".into(),
            LaneOverride {
                mode: Some(LaneMode::Collect),
                cap: None,
                drop_policy: None,
                collect_debounce_ms: Some(50),
            },
        );

        let (mode, cap, drop, debounce) = config.for_session("busy-session");
        assert_eq!(mode, LaneMode::Collect);
        assert_eq!(cap, 8);
        assert_eq!(drop, DropPolicy::Old);
        assert_eq!(debounce, 50);

        let (mode, ..) = config.for_session("other");
        assert_eq!(mode, LaneMode::Queue);
    }
}
