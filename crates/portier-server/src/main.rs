//! # portier-server
//!
//! Access-controlled relay in front of an upstream chat-completion API.
//!
//! This binary provides:
//! - **Authorization gate**: a global unlock window, allow-listed IPs inside
//!   weekly access windows, and bcrypt password login with per-IP lockout
//! - **Shared state** in a directory of small JSON files guarded by lock
//!   files, so several server processes can share one gate
//! - **Audit trail** of every authorization decision (`auth_log.txt`)
//! - **REST API** (axum) for auth status, password login, client IP info and
//!   completions

mod access_lock;
mod api;
mod attempts;
mod audit;
mod client_ip;
mod clock;
mod config;
mod credentials;
mod error;
mod gate;
mod gateway;
mod schedule;
mod state_store;

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::attempts::AttemptPolicy;
use crate::clock::SystemClock;
use crate::config::ServerConfig;
use crate::gate::{AuthorizationGate, GatePolicy};
use crate::gateway::CompletionGateway;
use crate::schedule::Schedule;
use crate::state_store::FileBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Load .env and initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,portier_server=debug")),
        )
        .init();

    info!("Starting Portier server v{}", env!("CARGO_PKG_VERSION"));
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    if config.password_hash.is_none() {
        warn!("AUTH_PASSWORD_HASH is not set, password login will answer 500");
    }
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set, completions will answer 500");
    }
    let windows: Vec<String> = config.access_windows.iter().map(ToString::to_string).collect();
    info!(
        allowed_ips = config.allowed_ips.len(),
        windows = ?windows,
        tz = %config.time_zone,
        "Access policy"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Shared gate state (creates directory if missing)
    let backend = Arc::new(FileBackend::new(config.state_dir.clone()).await?);
    info!(dir = %backend.dir().display(), "Gate state directory ready");

    let mut policy = GatePolicy::new(Schedule::new(
        config.time_zone,
        config.access_windows.clone(),
    ));
    policy.allowed_ips = config.allowed_ips.clone();
    policy.ip_window_minutes = config.ip_window_unlock_minutes;
    policy.max_unlock_minutes = config.max_unlock_minutes;
    policy.password_hash = config.password_hash.as_ref().map(|h| h.expose().to_string());
    policy.attempts = AttemptPolicy {
        max_attempts: config.max_failed_attempts,
        lockout: Duration::minutes(i64::from(config.lockout_minutes)),
    };
    let gate = Arc::new(AuthorizationGate::new(backend, Arc::new(SystemClock), policy));

    let gateway = Arc::new(CompletionGateway::new(
        config.openai_base_url.clone(),
        config.openai_api_key.as_ref().map(|k| k.expose().to_string()),
        config.openai_organization.clone(),
    )?);

    let http_addr = config.http_addr;
    let app_state = AppState {
        gate,
        gateway,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
