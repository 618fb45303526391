use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use drost_domain::config::{Config, ConfigSeverity, RESTART_EXIT_CODE};
use drost_gateway::api;
use drost_gateway::lifecycle;

#[derive(Parser)]
#[command(name = "drost", version, about = "Multi-tenant agent gateway")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "drost.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Config inspection.
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the effective config as TOML.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config { cmd }) => {
            let config = load_config(&cli.config)?;
            match cmd {
                ConfigCommand::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        eprintln!("{issue}");
                    }
                    if issues
                        .iter()
                        .any(|i| i.severity == ConfigSeverity::Error)
                    {
                        std::process::exit(1);
                    }
                    println!("config ok");
                    Ok(())
                }
                ConfigCommand::Show => {
                    println!(
                        "{}",
                        toml::to_string_pretty(&config).context("serializing config")?
                    );
                    Ok(())
                }
            }
        }
        Some(Command::Version) => {
            println!("drost {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,drost_gateway=debug")),
        )
        .json()
        .init();
}

/// Load the config file; a missing file yields the defaults.
fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("loading config {path:?}"))
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "drost starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Start (fatal failures bubble; recoverable ones degrade) ──────
    let state = lifecycle::start(config.clone()).await?;

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router(state.clone())
        .layer(build_cors_layer(&config.server.cors_allowed_origins))
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .with_state(state.clone());

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "control API listening");

    let shutdown = shutdown_signal(state.restart.notified());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("control server error")?;

    // ── Stop ─────────────────────────────────────────────────────────
    lifecycle::stop(&state);

    if let Some(reason) = state.restart.requested_reason() {
        tracing::warn!(reason = %reason, code = RESTART_EXIT_CODE, "exiting for restart");
        std::process::exit(RESTART_EXIT_CODE);
    }
    Ok(())
}

/// Resolve on SIGINT, SIGTERM, or an approved restart request.
async fn shutdown_signal(restart_notify: std::sync::Arc<tokio::sync::Notify>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
        _ = restart_notify.notified() => tracing::info!("restart approved, shutting down"),
    }
}

/// Exact-origin CORS; `["*"]` allows everything (not recommended).
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::{header, HeaderValue, Method};

    if origins.len() == 1 && origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" -- all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    // Partition into exact origins and wildcard-port prefixes
    // (e.g. "http://localhost:*" -> prefix "http://localhost:").
    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            wildcard_prefixes.push(prefix.to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        tower_http::cors::AllowOrigin::list(exact)
    } else {
        tower_http::cors::AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin_str = origin.to_str().unwrap_or("");
            // The remainder after the prefix must be digits only, so
            // "http://localhost:3000.evil.com" cannot slip through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
