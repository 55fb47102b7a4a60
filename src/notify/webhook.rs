//! Notifier implementations.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{Notifier, NotifyError};
use crate::db::UserNotificationSummary;

/// Headline used by notifiers for a summary.
pub fn report_subject(summary: &UserNotificationSummary) -> String {
    if summary.degraded_count > 0 {
        format!(
            "{}: {} site(s) need attention - Uptime Report",
            summary.username, summary.degraded_count
        )
    } else {
        format!("{}: All systems operational - Uptime Report", summary.username)
    }
}

/// Writes reports to the log. Used when no delivery endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(
        &self,
        user_id: i64,
        recipient: &str,
        summary: &UserNotificationSummary,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            "{} (user {}, {}): {}/{} operational",
            report_subject(summary),
            user_id,
            recipient,
            summary.operational_count(),
            summary.total()
        );
        for snap in &summary.snapshots {
            tracing::debug!(
                "  {} {:.2}% last checked {}",
                snap.url,
                snap.uptime_percentage,
                snap.last_checked
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    user_id: i64,
    recipient: &'a str,
    subject: String,
    summary: &'a UserNotificationSummary,
}

/// Posts each report as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(
        &self,
        user_id: i64,
        recipient: &str,
        summary: &UserNotificationSummary,
    ) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            user_id,
            recipient,
            subject: report_subject(summary),
            summary,
        };

        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        Ok(())
    }
}
