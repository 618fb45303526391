use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityHints, ProviderFamily};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which adapter implementation serves a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat-completions wire format (SSE streaming).
    OpenaiCompat,
    /// Deterministic scripted adapter for tests and offline runs.
    Mock,
}

/// Wire-level oddities of a specific upstream, applied by the adapter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireQuirks {
    /// The upstream streams cumulative text snapshots instead of diffs.
    #[serde(default)]
    pub cumulative_deltas: bool,
    /// The upstream rejects a leading system message; send it as a user turn.
    #[serde(default)]
    pub system_as_user: bool,
}

/// One configured upstream model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub family: ProviderFamily,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: String,
    /// Environment variable holding this profile's API key.
    #[serde(default)]
    pub auth_profile_id: Option<String>,
    #[serde(default)]
    pub capability_hints: Option<CapabilityHints>,
    #[serde(default)]
    pub wire_quirks: Option<WireQuirks>,
}

impl ProviderProfile {
    /// A minimal profile, used by config validation tests.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::Mock,
            family: ProviderFamily::Unknown,
            base_url: None,
            model: "mock-model".into(),
            auth_profile_id: None,
            capability_hints: None,
            wire_quirks: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routes + failover
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An ordered failover chain: primary plus fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub id: String,
    pub primary_provider_id: String,
    #[serde(default)]
    pub fallback_provider_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Same-provider retries before walking the fallback list.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Consecutive failures before a provider trips.
    #[serde(default = "d_trip_threshold")]
    pub trip_threshold: u32,
    /// How long a tripped provider is skipped by failover selection.
    #[serde(default = "d_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Probe all providers during gateway start.
    #[serde(default)]
    pub probe_on_start: bool,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: d_max_retries(),
            retry_delay_ms: d_retry_delay_ms(),
            trip_threshold: d_trip_threshold(),
            cooldown_ms: d_cooldown_ms(),
            probe_on_start: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_retries() -> u32 {
    2
}
fn d_retry_delay_ms() -> u64 {
    250
}
fn d_trip_threshold() -> u32 {
    3
}
fn d_cooldown_ms() -> u64 {
    30_000
}
