//! Per-user uptime reports.
//!
//! The [`NotificationTrigger`] assembles [`UserNotificationSummary`] values from
//! the check store and hands them to a [`Notifier`]. How a summary is rendered
//! and transported is entirely up to the notifier.

mod webhook;

pub use webhook::*;

use crate::db::{snapshot, CheckStore, DbError, User, UserNotificationSummary};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("storage error: {0}")]
    Store(#[from] DbError),
    #[error("unknown user {0}")]
    UnknownUser(i64),
    #[error("user {0} has no monitored targets")]
    NoTargets(i64),
    #[error("user {0} has no delivery address")]
    MissingAddress(i64),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivery side of notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        user_id: i64,
        recipient: &str,
        summary: &UserNotificationSummary,
    ) -> Result<(), NotifyError>;
}

/// Outcome of one periodic broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failures: Vec<(i64, NotifyError)>,
    /// Set when the user list itself could not be loaded.
    pub enumerate_error: Option<NotifyError>,
}

pub struct NotificationTrigger {
    store: Arc<dyn CheckStore>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationTrigger {
    pub fn new(store: Arc<dyn CheckStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Build the current summary for one user.
    pub fn summarize_user(&self, user_id: i64) -> Result<UserNotificationSummary, NotifyError> {
        let user = self
            .store
            .get_user(user_id)?
            .ok_or(NotifyError::UnknownUser(user_id))?;
        self.summarize(&user, Utc::now())
    }

    /// Summarize and deliver a report for one user right away.
    ///
    /// Returns whether the notifier accepted the report.
    pub async fn send_report(&self, user_id: i64) -> bool {
        let result = match self.store.get_user(user_id) {
            Ok(Some(user)) => self.notify_user(&user).await,
            Ok(None) => Err(NotifyError::UnknownUser(user_id)),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                tracing::info!("Report sent to user {}", user_id);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to send report to user {}: {}", user_id, e);
                false
            }
        }
    }

    /// Send a report to every user that owns at least one target.
    ///
    /// A failure for one user is logged and collected; the remaining users are
    /// still processed.
    pub async fn broadcast_periodic(&self) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let users = match self.store.users_with_targets() {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("Notifications: Failed to list users: {}", e);
                report.enumerate_error = Some(e.into());
                return report;
            }
        };

        if users.is_empty() {
            tracing::info!("Notifications: No users with targets to notify");
            return report;
        }

        tracing::info!("Notifications: Sending reports to {} users", users.len());

        for user in users {
            match self.notify_user(&user).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("Notifications: Report for {} failed: {}", user.username, e);
                    report.failures.push((user.id, e));
                }
            }
        }

        report
    }

    async fn notify_user(&self, user: &User) -> Result<(), NotifyError> {
        let recipient = user
            .email
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .ok_or(NotifyError::MissingAddress(user.id))?;

        let summary = self.summarize(user, Utc::now())?;
        self.notifier.deliver(user.id, recipient, &summary).await
    }

    fn summarize(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<UserNotificationSummary, NotifyError> {
        let targets = self.store.targets_for_user(user.id)?;
        if targets.is_empty() {
            return Err(NotifyError::NoTargets(user.id));
        }

        let snapshots = targets
            .iter()
            .map(|t| snapshot(self.store.as_ref(), t, now))
            .collect::<Result<Vec<_>, _>>()?;
        let degraded_count = snapshots.iter().filter(|s| s.is_degraded()).count();

        Ok(UserNotificationSummary {
            user_id: user.id,
            username: user.username.clone(),
            snapshots,
            degraded_count,
        })
    }
}
