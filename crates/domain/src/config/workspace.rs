use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root the built-in tools operate in.
    #[serde(default = "d_workspace_dir")]
    pub workspace_dir: PathBuf,
    /// Gateway state: session files, lane snapshots, restart history, traces.
    #[serde(default = "d_state_dir")]
    pub state_dir: PathBuf,
    /// Directories tools may mutate; empty = `[workspace_dir]`.
    #[serde(default)]
    pub mutable_roots: Vec<PathBuf>,
}

impl WorkspaceConfig {
    /// Mutable roots with the default applied.
    pub fn effective_mutable_roots(&self) -> Vec<PathBuf> {
        if self.mutable_roots.is_empty() {
            vec![self.workspace_dir.clone()]
        } else {
            self.mutable_roots.clone()
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            workspace_dir: d_workspace_dir(),
            state_dir: d_state_dir(),
            mutable_roots: Vec::new(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_workspace_dir() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_state_dir() -> PathBuf {
    PathBuf::from("./state")
}
