//! Probe module for HTTP uptime checks.

mod http;
mod pool;
#[cfg(test)]
pub(crate) mod testing;

pub use http::*;
pub use pool::*;

use crate::db::ProbeRecord;

use std::time::Duration;
use thiserror::Error;

/// User agent sent with every probe.
pub const USER_AGENT: &str = "UptimeMonitor/1.0 (Monitoring Service)";

/// Total time allowed for a single probe, redirects included.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("server answered with HTTP {0}")]
    HttpStatus(u16),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// The record produced by one probe, plus the failure kind when it failed.
#[derive(Debug, Clone)]
pub struct Probe {
    pub record: ProbeRecord,
    pub error: Option<ProbeError>,
}

impl Probe {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
