use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Environment variable holding the admin bearer token. Admin is
    /// required for all mutating verbs.
    #[serde(default = "d_admin_token_env")]
    pub admin_token_env: String,
    /// Environment variable holding the read-only bearer token.
    #[serde(default = "d_read_token_env")]
    pub read_token_env: String,
    /// Allow unauthenticated requests from loopback addresses.
    #[serde(default)]
    pub loopback_bypass: bool,
    /// Token-bucket refill rate for mutating verbs, per token per minute.
    #[serde(default = "d_mutation_rate")]
    pub mutation_rate_per_minute: u32,
    #[serde(default = "d_cors_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            admin_token_env: d_admin_token_env(),
            read_token_env: d_read_token_env(),
            loopback_bypass: false,
            mutation_rate_per_minute: d_mutation_rate(),
            cors_allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    3560
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_admin_token_env() -> String {
    "DROST_ADMIN_TOKEN".into()
}
fn d_read_token_env() -> String {
    "DROST_READ_TOKEN".into()
}
fn d_mutation_rate() -> u32 {
    60
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
