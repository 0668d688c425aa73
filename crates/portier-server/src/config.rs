//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development. A `.env` file in the working directory is loaded
//! first by `main`.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use chrono_tz::Tz;

use portier_shared::constants::{
    DEFAULT_HTTP_PORT, IP_WINDOW_UNLOCK_MINUTES, LOCKOUT_MINUTES, MAX_FAILED_ATTEMPTS,
    MAX_UNLOCK_MINUTES,
};

use crate::schedule::{self, AccessWindow};

/// A secret that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted(String);

impl Redacted {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Directory holding the shared gate state and the audit log.
    /// Env: `STATE_DIR`
    /// Default: `./state`
    pub state_dir: PathBuf,

    /// bcrypt hash of the access password.
    /// Env: `AUTH_PASSWORD_HASH`
    /// Default: unset (password login answers 500).
    pub password_hash: Option<Redacted>,

    /// IPs that are let in during the access windows.
    /// Env: `SECRET_ALLOWED_IPS` (comma-separated)
    pub allowed_ips: Vec<IpAddr>,

    /// Weekly windows, `day@HH:MM-HH:MM` separated by `;`, day 0 = Sunday.
    /// Env: `ACCESS_WINDOWS`
    pub access_windows: Vec<AccessWindow>,

    /// Time zone the access windows are expressed in.
    /// Env: `SET_TIME_ZONE`
    /// Default: `Europe/Zurich`
    pub time_zone: Tz,

    /// Env: `IP_WINDOW_UNLOCK_MINUTES`
    /// Default: `30`
    pub ip_window_unlock_minutes: u32,

    /// Env: `MAX_FAILED_ATTEMPTS`
    /// Default: `5`
    pub max_failed_attempts: u32,

    /// Env: `LOCKOUT_MINUTES`
    /// Default: `15`
    pub lockout_minutes: u32,

    /// Cap on the unlock duration a password may request.
    /// Env: `MAX_UNLOCK_MINUTES`
    /// Default: `1440`
    pub max_unlock_minutes: u32,

    /// Reverse proxies whose `X-Forwarded-For` / `X-Real-IP` headers are
    /// believed. Requests from any other peer are identified by the socket
    /// address alone.
    /// Env: `TRUSTED_PROXIES` (comma-separated)
    /// Default: empty
    pub trusted_proxies: Vec<IpAddr>,

    /// Env: `OPENAI_API_KEY`
    pub openai_api_key: Option<Redacted>,

    /// Env: `OPENAI_ORG_ID`
    pub openai_organization: Option<String>,

    /// Env: `OPENAI_BASE_URL`
    /// Default: `https://api.openai.com`
    pub openai_base_url: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            state_dir: PathBuf::from("./state"),
            password_hash: None,
            allowed_ips: Vec::new(),
            access_windows: Vec::new(),
            time_zone: chrono_tz::Europe::Zurich,
            ip_window_unlock_minutes: IP_WINDOW_UNLOCK_MINUTES,
            max_failed_attempts: MAX_FAILED_ATTEMPTS,
            lockout_minutes: LOCKOUT_MINUTES,
            max_unlock_minutes: MAX_UNLOCK_MINUTES,
            trusted_proxies: Vec::new(),
            openai_api_key: None,
            openai_organization: None,
            openai_base_url: "https://api.openai.com".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2 MiB
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(dir) = var("STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }

        config.password_hash = non_empty(var("AUTH_PASSWORD_HASH")).map(Redacted);
        config.openai_api_key = non_empty(var("OPENAI_API_KEY")).map(Redacted);
        config.openai_organization = non_empty(var("OPENAI_ORG_ID"));

        if let Some(url) = non_empty(var("OPENAI_BASE_URL")) {
            config.openai_base_url = url;
        }

        if let Some(list) = var("SECRET_ALLOWED_IPS") {
            config.allowed_ips = parse_ip_list("SECRET_ALLOWED_IPS", &list);
        }

        if let Some(windows) = var("ACCESS_WINDOWS") {
            match schedule::parse_windows(&windows) {
                Ok(parsed) => config.access_windows = parsed,
                Err(e) => tracing::warn!(error = %e, "Invalid ACCESS_WINDOWS, no windows configured"),
            }
        }

        if let Some(tz) = var("SET_TIME_ZONE") {
            match tz.trim().parse::<Tz>() {
                Ok(parsed) => config.time_zone = parsed,
                Err(_) => tracing::warn!(value = %tz, "Invalid SET_TIME_ZONE, using default"),
            }
        }

        parse_number(&var, "IP_WINDOW_UNLOCK_MINUTES", &mut config.ip_window_unlock_minutes);
        parse_number(&var, "MAX_FAILED_ATTEMPTS", &mut config.max_failed_attempts);
        parse_number(&var, "LOCKOUT_MINUTES", &mut config.lockout_minutes);
        parse_number(&var, "MAX_UNLOCK_MINUTES", &mut config.max_unlock_minutes);

        if config.max_failed_attempts == 0 {
            tracing::warn!("MAX_FAILED_ATTEMPTS must be at least 1, using 1");
            config.max_failed_attempts = 1;
        }

        if let Some(list) = var("TRUSTED_PROXIES") {
            config.trusted_proxies = parse_ip_list("TRUSTED_PROXIES", &list);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number(var: &impl Fn(&str) -> Option<String>, name: &str, target: &mut u32) {
    if let Some(val) = var(name) {
        match val.trim().parse::<u32>() {
            Ok(n) => *target = n,
            Err(_) => tracing::warn!(value = %val, "Invalid {name}, using default"),
        }
    }
}

fn parse_ip_list(name: &str, list: &str) -> Vec<IpAddr> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(value = %item, "Ignoring invalid entry in {name}");
                None
            }
        })
        .collect()
}
