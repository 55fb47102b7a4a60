//! Configuration module for the uptime monitor.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::PoolConfig;
use crate::scheduler::SchedulerConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the control API (default: 8000)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptime_monitor.db")
    pub db_path: String,
    /// Seconds between probing passes (default: 300)
    pub probe_interval_secs: u64,
    /// Total timeout of one probe in seconds (default: 30)
    pub probe_timeout_secs: u64,
    /// Probes in flight across all hosts (default: 100)
    pub max_connections: usize,
    /// Probes in flight per host (default: 10)
    pub max_connections_per_host: usize,
    /// Endpoint receiving uptime reports; reports are only logged when unset
    pub webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8000,
            db_path: "uptime_monitor.db".to_string(),
            probe_interval_secs: 300,
            probe_timeout_secs: 30,
            max_connections: 100,
            max_connections_per_host: 10,
            webhook_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTIME_HTTP_PORT`: HTTP port (default: 8000)
    /// - `UPTIME_DB_PATH`: Database file path (default: "uptime_monitor.db")
    /// - `UPTIME_PROBE_INTERVAL_SECS`: Pause between passes (default: 300)
    /// - `UPTIME_PROBE_TIMEOUT_SECS`: Probe timeout (default: 30)
    /// - `UPTIME_MAX_CONNECTIONS`: Global connection limit (default: 100)
    /// - `UPTIME_MAX_CONNECTIONS_PER_HOST`: Per-host connection limit (default: 10)
    /// - `UPTIME_WEBHOOK_URL`: Report delivery endpoint (default: unset)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        parse_into(&lookup, "UPTIME_HTTP_PORT", &mut cfg.http_port);
        if let Some(db_path) = lookup("UPTIME_DB_PATH") {
            cfg.db_path = db_path;
        }
        parse_into(&lookup, "UPTIME_PROBE_INTERVAL_SECS", &mut cfg.probe_interval_secs);
        parse_into(&lookup, "UPTIME_PROBE_TIMEOUT_SECS", &mut cfg.probe_timeout_secs);
        parse_into(&lookup, "UPTIME_MAX_CONNECTIONS", &mut cfg.max_connections);
        parse_into(
            &lookup,
            "UPTIME_MAX_CONNECTIONS_PER_HOST",
            &mut cfg.max_connections_per_host,
        );
        cfg.webhook_url = lookup("UPTIME_WEBHOOK_URL").filter(|url| !url.trim().is_empty());

        cfg
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.probe_interval_secs.max(1)),
            pool: PoolConfig {
                timeout: Duration::from_secs(self.probe_timeout_secs.max(1)),
                max_connections: self.max_connections,
                max_connections_per_host: self.max_connections_per_host,
                system_proxy: true,
            },
        }
    }
}

/// Overwrite `slot` when the variable is set and parses; keep the default otherwise.
fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key) {
        match value.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!("Ignoring invalid value for {}: {:?}", key, value),
        }
    }
}
