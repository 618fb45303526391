//! Control-API authentication and mutation rate limiting.
//!
//! Admin and read-only bearer tokens are read from the environment **once
//! at startup** and kept as SHA-256 digests compared in constant time.
//! Mutating verbs additionally drain a per-token token bucket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use drost_domain::config::ServerConfig;

use crate::state::AppState;

use super::api_error;

/// Who the caller is, attached to request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Admin,
    ReadOnly,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct AuthState {
    admin_hash: Option<Vec<u8>>,
    read_hash: Option<Vec<u8>>,
    loopback_bypass: bool,
    rate_per_minute: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl AuthState {
    /// Read the token env vars named by the config. Unset tokens disable
    /// that tier; with neither set, the API runs in dev mode (open).
    pub fn from_config(server: &ServerConfig) -> Self {
        let admin_hash = read_token_hash(&server.admin_token_env);
        let read_hash = read_token_hash(&server.read_token_env);
        if admin_hash.is_none() && read_hash.is_none() {
            tracing::warn!(
                admin_env = %server.admin_token_env,
                read_env = %server.read_token_env,
                "control API auth DISABLED -- set the token env vars to enable"
            );
        }
        Self {
            admin_hash,
            read_hash,
            loopback_bypass: server.loopback_bypass,
            rate_per_minute: server.mutation_rate_per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Test constructor with raw tokens.
    pub fn with_tokens(
        admin: Option<&str>,
        read: Option<&str>,
        loopback_bypass: bool,
        rate_per_minute: u32,
    ) -> Self {
        Self {
            admin_hash: admin.map(|t| Sha256::digest(t.as_bytes()).to_vec()),
            read_hash: read.map(|t| Sha256::digest(t.as_bytes()).to_vec()),
            loopback_bypass,
            rate_per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Identify a caller; `None` means unauthorized.
    pub fn identify(&self, bearer: Option<&str>, peer_is_loopback: bool) -> Option<Identity> {
        if self.admin_hash.is_none() && self.read_hash.is_none() {
            // Dev mode.
            return Some(Identity::Admin);
        }

        if let Some(token) = bearer {
            let provided = Sha256::digest(token.as_bytes());
            if let Some(expected) = &self.admin_hash {
                if bool::from(provided.ct_eq(expected.as_slice())) {
                    return Some(Identity::Admin);
                }
            }
            if let Some(expected) = &self.read_hash {
                if bool::from(provided.ct_eq(expected.as_slice())) {
                    return Some(Identity::ReadOnly);
                }
            }
        }

        if self.loopback_bypass && peer_is_loopback {
            return Some(Identity::Admin);
        }
        None
    }

    /// Drain one token from a caller's mutation bucket.
    pub fn try_consume_mutation(&self, key: &str) -> bool {
        let capacity = f64::from(self.rate_per_minute);
        let refill_per_sec = capacity / 60.0;

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_owned()).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: Instant::now(),
        });

        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last_refill = Instant::now();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

fn read_token_hash(env_var: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var) {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => None,
    }
}

fn is_mutation(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::DELETE)
}

/// Axum middleware enforcing auth + the mutation rate limit.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let peer_is_loopback = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().is_loopback())
        .unwrap_or(false);

    let bearer = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);

    let Some(identity) = state.auth.identify(bearer.as_deref(), peer_is_loopback) else {
        return api_error(
            axum::http::StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid or missing bearer token",
        );
    };

    if is_mutation(req.method()) {
        if identity != Identity::Admin {
            return api_error(
                axum::http::StatusCode::UNAUTHORIZED,
                "unauthorized",
                "mutations require the admin token",
            );
        }

        let bucket_key = bearer
            .as_deref()
            .map(|t| hex::encode(Sha256::digest(t.as_bytes())))
            .unwrap_or_else(|| "local".to_owned());
        if !state.auth.try_consume_mutation(&bucket_key) {
            return api_error(
                axum::http::StatusCode::TOO_MANY_REQUESTS,
                "mutation_rate_limited",
                "mutation rate limit exceeded for this token",
            );
        }
    }

    let mut req = req;
    req.extensions_mut().insert(identity);
    next.run(req).await
}
