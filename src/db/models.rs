//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A URL tracked for monitoring on behalf of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub url: String,
    pub user_id: i64,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            url: String::new(),
            user_id: 0,
            category: None,
            created_at: Utc::now(),
        }
    }
}

/// Owner of targets, as known to the storage side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
}

/// Outcome class of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Success,
    Error,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Success => "success",
            ProbeStatus::Error => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeStatus::Success)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ProbeStatus::Success),
            "error" => Ok(ProbeStatus::Error),
            other => Err(format!("unknown probe status: {}", other)),
        }
    }
}

/// A single recorded probe outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub target_id: i64,
    /// Probe completion time
    pub timestamp: DateTime<Utc>,
    pub status: ProbeStatus,
    /// HTTP status code, or 0 when no response was received
    pub response_code: u16,
    pub latency_ms: u64,
}

/// Rolling uptime for one target, derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeSnapshot {
    pub target_id: i64,
    pub url: String,
    pub category: Option<String>,
    pub uptime_percentage: f64,
    /// `None` means the target has never been probed.
    pub last_checked: Option<DateTime<Utc>>,
}

/// Per-user report handed to a notifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserNotificationSummary {
    pub user_id: i64,
    pub username: String,
    pub snapshots: Vec<UptimeSnapshot>,
    pub degraded_count: usize,
}

impl UserNotificationSummary {
    pub fn total(&self) -> usize {
        self.snapshots.len()
    }

    pub fn operational_count(&self) -> usize {
        self.total() - self.degraded_count
    }
}
