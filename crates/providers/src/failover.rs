//! Per-provider failover state machine.
//!
//! Tracks `{healthy, tripped}` per provider id with a consecutive-failure
//! counter. A tripped provider is skipped by failover selection until its
//! cool-down elapses. The turn loop owns retries; this module owns the
//! bookkeeping and the error classification.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use drost_domain::config::{FailoverConfig, RouteConfig};
use drost_domain::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map an HTTP failure status to the error taxonomy.
///
/// 408 (timeout), 425 (too early), 429 (rate limited) and all 5xx are
/// transient and classified retryable. 401/403 are auth. Everything else in
/// 4xx is a request the provider rejected on its merits; retrying the same
/// payload cannot succeed.
pub fn error_for_status(provider: &str, status: u16, body: &str) -> Error {
    match status {
        401 | 403 => Error::ProviderAuth {
            provider: provider.to_owned(),
            message: format!("HTTP {status} - {body}"),
        },
        408 | 425 | 429 | 500..=599 => Error::ProviderTransport {
            provider: provider.to_owned(),
            message: format!("HTTP {status} - {body}"),
        },
        _ => Error::validation(format!("provider {provider}: HTTP {status} - {body}"), vec![]),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct ProviderHealth {
    consecutive_failures: u32,
    tripped_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

/// Snapshot of one provider's failover state, for /status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub provider_id: String,
    pub healthy: bool,
    pub tripped: bool,
    pub consecutive_failures: u32,
}

pub struct FailoverState {
    config: FailoverConfig,
    health: Mutex<HashMap<String, ProviderHealth>>,
}

impl FailoverState {
    pub fn new(config: FailoverConfig) -> Self {
        Self {
            config,
            health: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Record a successful invocation: clears the failure streak and any
    /// trip.
    pub fn record_success(&self, provider_id: &str) {
        let mut health = self.health.lock();
        let entry = health.entry(provider_id.to_owned()).or_default();
        entry.consecutive_failures = 0;
        entry.tripped_at = None;
    }

    /// Record a retryable failure. Returns `true` when this failure tripped
    /// the provider.
    pub fn record_failure(&self, provider_id: &str) -> bool {
        let mut health = self.health.lock();
        let entry = health.entry(provider_id.to_owned()).or_default();
        entry.consecutive_failures += 1;
        entry.last_failure_at = Some(Instant::now());

        if entry.tripped_at.is_none() && entry.consecutive_failures >= self.config.trip_threshold {
            entry.tripped_at = Some(Instant::now());
            tracing::warn!(
                provider_id,
                failures = entry.consecutive_failures,
                "provider tripped"
            );
            return true;
        }
        false
    }

    /// Whether a provider is currently tripped. A trip older than the
    /// cool-down is cleared on the way out.
    pub fn is_tripped(&self, provider_id: &str) -> bool {
        let mut health = self.health.lock();
        let Some(entry) = health.get_mut(provider_id) else {
            return false;
        };
        match entry.tripped_at {
            Some(at) if at.elapsed() >= Duration::from_millis(self.config.cooldown_ms) => {
                entry.tripped_at = None;
                entry.consecutive_failures = 0;
                tracing::info!(provider_id, "provider trip expired");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Ordered provider chain for a turn: the primary followed by the
    /// route's fallbacks, with tripped providers skipped.
    pub fn select_chain(&self, primary: &str, route: Option<&RouteConfig>) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        let mut push = |id: &str, chain: &mut Vec<String>| {
            if !chain.iter().any(|c| c == id) && !self.is_tripped(id) {
                chain.push(id.to_owned());
            }
        };

        push(primary, &mut chain);
        if let Some(route) = route {
            for id in &route.fallback_provider_ids {
                push(id, &mut chain);
            }
        }

        // A fully-tripped chain still gets the primary: failing loudly on
        // the real provider beats failing on an empty list.
        if chain.is_empty() {
            chain.push(primary.to_owned());
        }
        chain
    }

    /// Current state of every tracked provider.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let health = self.health.lock();
        let mut out: Vec<HealthSnapshot> = health
            .iter()
            .map(|(id, h)| HealthSnapshot {
                provider_id: id.clone(),
                healthy: h.consecutive_failures == 0,
                tripped: h.tripped_at.is_some(),
                consecutive_failures: h.consecutive_failures,
            })
            .collect();
        out.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FailoverConfig {
        FailoverConfig {
            max_retries: 2,
            retry_delay_ms: 0,
            trip_threshold: 2,
            cooldown_ms: 50,
            probe_on_start: false,
        }
    }

    fn route(fallbacks: &[&str]) -> RouteConfig {
        RouteConfig {
            id: "r".into(),
            primary_provider_id: "primary".into(),
            fallback_provider_ids: fallbacks.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn status_classification() {
        assert!(error_for_status("p", 429, "slow down").is_retryable());
        assert!(error_for_status("p", 503, "").is_retryable());
        assert!(error_for_status("p", 408, "").is_retryable());
        assert!(error_for_status("p", 425, "").is_retryable());
        assert!(!error_for_status("p", 401, "").is_retryable());
        assert!(!error_for_status("p", 409, "").is_retryable());
        assert!(!error_for_status("p", 400, "").is_retryable());
    }

    #[test]
    fn trips_after_threshold() {
        let state = FailoverState::new(config());
        assert!(!state.record_failure("p1"));
        assert!(state.record_failure("p1"));
        assert!(state.is_tripped("p1"));
    }

    #[test]
    fn success_clears_streak() {
        let state = FailoverState::new(config());
        state.record_failure("p1");
        state.record_success("p1");
        assert!(!state.record_failure("p1"));
        assert!(!state.is_tripped("p1"));
    }

    #[test]
    fn trip_expires_after_cooldown() {
        let state = FailoverState::new(config());
        state.record_failure("p1");
        state.record_failure("p1");
        assert!(state.is_tripped("p1"));

        std::thread::sleep(Duration::from_millis(60));
        assert!(!state.is_tripped("p1"));
    }

    #[test]
    fn chain_skips_tripped_fallbacks() {
        let state = FailoverState::new(config());
        state.record_failure("fb1");
        state.record_failure("fb1");

        let chain = state.select_chain("primary", Some(&route(&["fb1", "fb2"])));
        assert_eq!(chain, vec!["primary".to_string(), "fb2".to_string()]);
    }

    #[test]
    fn fully_tripped_chain_keeps_primary() {
        let state = FailoverState::new(config());
        for id in ["primary", "fb1"] {
            state.record_failure(id);
            state.record_failure(id);
        }
        let chain = state.select_chain("primary", Some(&route(&["fb1"])));
        assert_eq!(chain, vec!["primary".to_string()]);
    }

    #[test]
    fn chain_dedupes_primary_in_fallbacks() {
        let state = FailoverState::new(config());
        let chain = state.select_chain("primary", Some(&route(&["primary", "fb1"])));
        assert_eq!(chain, vec!["primary".to_string(), "fb1".to_string()]);
    }
}
