//! `web` tool -- `fetch` and `search` with strict limits and an SSRF guard.

use std::net::IpAddr;

use serde::Deserialize;
use serde_json::Value;

use drost_domain::config::WebConfig;
use drost_domain::tool::{ToolDefinition, ToolOutcome};

use crate::runtime::{Tool, ToolContext};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
enum WebRequest {
    Fetch { url: String },
    Search { query: String },
}

pub struct WebTool {
    config: WebConfig,
    client: reqwest::Client,
}

impl WebTool {
    pub fn new(config: WebConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn fetch(&self, url: &str) -> ToolOutcome {
        if let Err(reason) = validate_url(url).await {
            return ToolOutcome::failure("blocked_url", reason);
        }

        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("fetch_failed", e.to_string()),
        };

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        // Stream the body with a hard size cap.
        let mut body: Vec<u8> = Vec::new();
        let mut resp = resp;
        loop {
            match resp.chunk().await {
                Ok(Some(bytes)) => {
                    if body.len() + bytes.len() > self.config.max_bytes {
                        body.extend_from_slice(&bytes[..self.config.max_bytes - body.len()]);
                        break;
                    }
                    body.extend_from_slice(&bytes);
                }
                Ok(None) => break,
                Err(e) => return ToolOutcome::failure("fetch_failed", e.to_string()),
            }
        }

        let mut text = String::from_utf8_lossy(&body).into_owned();
        if text.len() > self.config.max_text_chars {
            let mut cut = self.config.max_text_chars;
            while cut < text.len() && !text.is_char_boundary(cut) {
                cut += 1;
            }
            text.truncate(cut);
        }

        ToolOutcome::success(serde_json::json!({
            "status": status,
            "content_type": content_type,
            "text": text,
        }))
    }

    async fn search(&self, query: &str) -> ToolOutcome {
        let Some(base) = self.config.search_base_url.as_deref() else {
            return ToolOutcome::failure(
                "search_unavailable",
                "no search endpoint configured (tools.web.search_base_url)",
            );
        };

        let url = format!("{base}?q={}", urlencode(query));
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("search_failed", e.to_string()),
        };
        if !resp.status().is_success() {
            return ToolOutcome::failure(
                "search_failed",
                format!("search endpoint returned HTTP {}", resp.status()),
            );
        }

        match resp.json::<Value>().await {
            Ok(results) => ToolOutcome::success(serde_json::json!({
                "query": query,
                "results": results,
            })),
            Err(e) => ToolOutcome::failure("search_failed", format!("invalid search response: {e}")),
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web".into(),
            description: "Fetch a URL or search the web.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["fetch", "search"] },
                    "url": { "type": "string" },
                    "query": { "type": "string" }
                },
                "required": ["action"]
            }),
        }
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolOutcome {
        let request: WebRequest = match serde_json::from_value(input) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("bad_input", e.to_string()),
        };
        match request {
            WebRequest::Fetch { url } => self.fetch(&url).await,
            WebRequest::Search { query } => self.search(&query).await,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// URL validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a URL for SSRF safety before making a request.
///
/// Rejects non-http(s) schemes, and resolves the hostname so a domain
/// pointing at a private or internal address is caught the same way a
/// literal IP is. If ANY resolved address is private, the URL is blocked.
async fn validate_url(raw: &str) -> Result<(), String> {
    let url = reqwest::Url::parse(raw).map_err(|e| format!("invalid URL '{raw}': {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme '{other}' is not allowed")),
    }

    let Some(host) = url.host_str() else {
        return Err("URL has no host".into());
    };
    let port = url.port_or_known_default().unwrap_or(80);

    // Literal IPs (host_str keeps IPv6 brackets) need no resolution.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(format!("requests to private address {ip} are blocked"));
        }
        return Ok(());
    }

    let addrs: Vec<std::net::SocketAddr> = tokio::net::lookup_host((bare, port))
        .await
        .map_err(|e| format!("DNS resolution failed for {host}: {e}"))?
        .collect();
    if addrs.is_empty() {
        return Err(format!("DNS resolution returned no addresses for {host}"));
    }
    for addr in &addrs {
        if is_private_ip(&addr.ip()) {
            return Err(format!(
                "blocked request to private address: {host} resolves to {}",
                addr.ip()
            ));
        }
    }
    Ok(())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()                // 127.0.0.0/8
                || v4.is_private()          // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()       // 169.254.0.0/16
                || v4.is_broadcast()        // 255.255.255.255
                || v4.is_unspecified()      // 0.0.0.0
                || is_v4_shared(v4)         // 100.64.0.0/10 (CGNAT)
                || is_v4_documentation(v4)  // 192.0.2/24, 198.51.100/24, 203.0.113/24
                || is_v4_benchmarking(v4)   // 198.18.0.0/15
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // unique-local fc00::/7
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // link-local fe80::/10
        }
    }
}

/// 100.64.0.0/10 -- shared address space (RFC 6598 / CGNAT).
fn is_v4_shared(ip: &std::net::Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Documentation ranges: 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24.
fn is_v4_documentation(ip: &std::net::Ipv4Addr) -> bool {
    let octets = ip.octets();
    (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
}

/// Benchmarking range: 198.18.0.0/15.
fn is_v4_benchmarking(ip: &std::net::Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 198 && (octets[1] & 0xFE) == 18
}

fn urlencode(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            b' ' => "+".to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}
