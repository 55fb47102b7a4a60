//! Rolling uptime statistics derived from probe history.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::models::{ProbeRecord, Target, UptimeSnapshot};
use super::store::{CheckStore, DbError};

/// Trailing window used for the uptime percentage.
pub const UPTIME_WINDOW_HOURS: i64 = 24;

/// Targets below this uptime percentage count as degraded.
pub const DEGRADED_THRESHOLD: f64 = 99.0;

/// Compute the uptime snapshot for a target as of `now`.
///
/// The percentage covers records in `(now - 24h, now]`. `last_checked` is the
/// newest record of any age, so a target whose only probes are older than the
/// window reports 0% together with a `last_checked` value, while a target that
/// was never probed reports 0% with `last_checked == None`.
pub fn snapshot(
    store: &dyn CheckStore,
    target: &Target,
    now: DateTime<Utc>,
) -> Result<UptimeSnapshot, DbError> {
    let since = now - ChronoDuration::hours(UPTIME_WINDOW_HOURS);
    let in_window: Vec<ProbeRecord> = store
        .history(target.id, Some(since), None)?
        .into_iter()
        .filter(|r| r.timestamp <= now)
        .collect();

    let last_checked = store
        .history(target.id, None, Some(1))?
        .first()
        .map(|r| r.timestamp);

    Ok(UptimeSnapshot {
        target_id: target.id,
        url: target.url.clone(),
        category: target.category.clone(),
        uptime_percentage: uptime_percentage(&in_window),
        last_checked,
    })
}

/// Share of successful records in percent, 0 for an empty slice.
pub fn uptime_percentage(records: &[ProbeRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let successful = records.iter().filter(|r| r.status.is_success()).count();
    round2(100.0 * successful as f64 / records.len() as f64)
}

/// Round to two decimal places, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl UptimeSnapshot {
    pub fn is_degraded(&self) -> bool {
        self.uptime_percentage < DEGRADED_THRESHOLD
    }
}
