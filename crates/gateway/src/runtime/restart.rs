//! Restart requests: intent classification, approval policy, and the
//! rolling-window budget that prevents restart storms.
//!
//! An approved restart asks the main loop to exit with
//! [`RESTART_EXIT_CODE`] so an external supervisor respawns the process.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use drost_domain::config::{RestartConfig, RESTART_EXIT_CODE};
use drost_domain::{Error, Result};

pub const RESTART_HISTORY_FILE: &str = "restart-history.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartIntent {
    Manual,
    Signal,
    SelfMod,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RestartHistory {
    attempts: Vec<DateTime<Utc>>,
}

/// Coordinates restart requests for the whole process.
pub struct RestartCoordinator {
    config: RestartConfig,
    history_path: Option<PathBuf>,
    history: Mutex<RestartHistory>,
    /// Signalled once a restart is approved; main exits with the code.
    notify: Arc<Notify>,
    requested: Mutex<Option<String>>,
}

impl RestartCoordinator {
    pub fn new(config: RestartConfig, state_dir: Option<&std::path::Path>) -> Self {
        let history_path = state_dir.map(|d| d.join(RESTART_HISTORY_FILE));
        let history = history_path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Self {
            config,
            history_path,
            history: Mutex::new(history),
            notify: Arc::new(Notify::new()),
            requested: Mutex::new(None),
        }
    }

    /// Resolves once a restart is approved.
    pub fn notified(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// The reason of an approved restart, if one was requested.
    pub fn requested_reason(&self) -> Option<String> {
        self.requested.lock().clone()
    }

    /// Attempts inside the current rolling window.
    pub fn attempts_in_window(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.config.window_secs as i64);
        self.history
            .lock()
            .attempts
            .iter()
            .filter(|t| **t > cutoff)
            .count()
    }

    /// Handle one restart request.
    ///
    /// Policy: self-mod restarts skip the approval gate (by configuration);
    /// manual/signal restarts fail when approval is required. The budget
    /// over the rolling window is never exceeded. `dry_run` evaluates
    /// policy and budget without recording or restarting.
    pub fn request(
        &self,
        intent: RestartIntent,
        reason: &str,
        dry_run: bool,
    ) -> Result<serde_json::Value> {
        match intent {
            RestartIntent::SelfMod if !self.config.allow_self_mod => {
                return Err(Error::PolicyDenied(
                    "self-modification restarts are disabled".into(),
                ));
            }
            RestartIntent::Manual | RestartIntent::Signal if self.config.require_approval => {
                return Err(Error::PolicyDenied(
                    "restart requires operator approval".into(),
                ));
            }
            _ => {}
        }

        let in_window = self.attempts_in_window();
        if in_window >= self.config.max_restarts {
            return Err(Error::BudgetExceeded(format!(
                "restart budget exceeded ({in_window} in the last {}s)",
                self.config.window_secs
            )));
        }

        if dry_run {
            return Ok(serde_json::json!({
                "accepted": true,
                "dryRun": true,
                "attemptsInWindow": in_window,
            }));
        }

        {
            let mut history = self.history.lock();
            let cutoff = Utc::now() - Duration::seconds(self.config.window_secs as i64);
            history.attempts.retain(|t| *t > cutoff);
            history.attempts.push(Utc::now());
            if let Some(path) = &self.history_path {
                if let Ok(json) = serde_json::to_string_pretty(&*history) {
                    if let Err(e) = std::fs::write(path, json) {
                        tracing::warn!(error = %e, "failed to persist restart history");
                    }
                }
            }
        }

        tracing::warn!(?intent, reason, "restart approved");
        *self.requested.lock() = Some(reason.to_owned());
        self.notify.notify_waiters();

        Ok(serde_json::json!({
            "accepted": true,
            "exitCode": RESTART_EXIT_CODE,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(max: usize) -> RestartConfig {
        RestartConfig {
            max_restarts: max,
            window_secs: 300,
            allow_self_mod: true,
            require_approval: false,
        }
    }

    #[test]
    fn budget_enforced_over_window() {
        let coordinator = RestartCoordinator::new(config(2), None);
        assert!(coordinator.request(RestartIntent::Manual, "one", false).is_ok());
        assert!(coordinator.request(RestartIntent::Manual, "two", false).is_ok());

        let err = coordinator
            .request(RestartIntent::Manual, "three", false)
            .unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded(_)));
    }

    #[test]
    fn dry_run_does_not_consume_budget() {
        let coordinator = RestartCoordinator::new(config(1), None);
        let result = coordinator
            .request(RestartIntent::Manual, "check", true)
            .unwrap();
        assert_eq!(result["dryRun"], true);
        assert_eq!(coordinator.attempts_in_window(), 0);

        assert!(coordinator.request(RestartIntent::Manual, "real", false).is_ok());
    }

    #[test]
    fn approval_gate_blocks_manual_not_self_mod() {
        let coordinator = RestartCoordinator::new(
            RestartConfig {
                require_approval: true,
                ..config(5)
            },
            None,
        );

        let err = coordinator
            .request(RestartIntent::Manual, "manual", false)
            .unwrap_err();
        assert!(matches!(err, Error::PolicyDenied(_)));

        // Self-mod is allowed without approval by default.
        assert!(coordinator
            .request(RestartIntent::SelfMod, "evolution", false)
            .is_ok());
    }

    #[test]
    fn self_mod_can_be_disabled() {
        let coordinator = RestartCoordinator::new(
            RestartConfig {
                allow_self_mod: false,
                ..config(5)
            },
            None,
        );
        let err = coordinator
            .request(RestartIntent::SelfMod, "evolution", false)
            .unwrap_err();
        assert!(matches!(err, Error::PolicyDenied(_)));
    }

    #[test]
    fn history_survives_reload() {
        let dir = TempDir::new().unwrap();
        {
            let coordinator = RestartCoordinator::new(config(5), Some(dir.path()));
            coordinator
                .request(RestartIntent::Signal, "first", false)
                .unwrap();
        }
        let reloaded = RestartCoordinator::new(config(5), Some(dir.path()));
        assert_eq!(reloaded.attempts_in_window(), 1);
    }

    #[tokio::test]
    async fn approved_restart_notifies() {
        let coordinator = RestartCoordinator::new(config(5), None);
        let notify = coordinator.notified();
        let waiter = tokio::spawn(async move { notify.notified().await });
        tokio::task::yield_now().await;

        coordinator
            .request(RestartIntent::SelfMod, "update applied", false)
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_millis(500), waiter)
            .await
            .expect("restart notification")
            .unwrap();
        assert_eq!(
            coordinator.requested_reason().as_deref(),
            Some("update applied")
        );
    }
}
