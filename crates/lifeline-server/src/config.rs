//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use lifeline_shared::constants::DEFAULT_RING_TIMEOUT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DB_PATH`
    /// Default: `./lifeline.db`
    pub db_path: PathBuf,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Lifeline Node"`
    pub instance_name: String,

    /// How long a call may ring before it expires to `missed`.
    /// Env: `RING_TIMEOUT_SECS`
    /// Default: 60
    pub ring_timeout: Duration,

    /// Optional webhook URL for the notification collaborator. When unset,
    /// call-ringing and message-received events are not emitted anywhere.
    /// Env: `NOTIFY_WEBHOOK_URL`
    pub notify_webhook_url: Option<String>,

    /// Sustained per-IP request rate. Sized for polling clients that issue
    /// three concurrent 2-15s loops each.
    /// Env: `RATE_LIMIT_RATE`
    /// Default: 20.0
    pub rate_limit_rate: f64,

    /// Per-IP burst capacity.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: 60.0
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: PathBuf::from("./lifeline.db"),
            instance_name: "Lifeline Node".to_string(),
            ring_timeout: DEFAULT_RING_TIMEOUT,
            notify_webhook_url: None,
            rate_limit_rate: 20.0,
            rate_limit_burst: 60.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(val) = std::env::var("RING_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.ring_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!(value = %val, "Invalid RING_TIMEOUT_SECS, using default");
            }
        }

        if let Ok(url) = std::env::var("NOTIFY_WEBHOOK_URL") {
            if !url.is_empty() {
                config.notify_webhook_url = Some(url);
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_RATE") {
            if let Ok(rate) = val.parse::<f64>() {
                config.rate_limit_rate = rate;
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_BURST") {
            if let Ok(burst) = val.parse::<f64>() {
                config.rate_limit_burst = burst;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.ring_timeout, Duration::from_secs(60));
        assert!(config.notify_webhook_url.is_none());
    }
}
