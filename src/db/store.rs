//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("connection lock poisoned")]
    Poisoned,
}

/// Storage operations the monitoring engine depends on.
///
/// Implementations must tolerate concurrent `record` calls from many probe
/// tasks at once.
pub trait CheckStore: Send + Sync {
    /// All currently tracked targets. Never cached across calls.
    fn list_all_targets(&self) -> Result<Vec<Target>, DbError>;

    /// First target registered under `url`, across all users.
    fn find_target_by_url(&self, url: &str) -> Result<Option<Target>, DbError>;

    /// Append one probe outcome.
    fn record(&self, record: &ProbeRecord) -> Result<(), DbError>;

    /// Probe history for a target, most recent first. `since` is exclusive.
    fn history(
        &self,
        target_id: i64,
        since: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<ProbeRecord>, DbError>;

    /// Users owning at least one target.
    fn users_with_targets(&self) -> Result<Vec<User>, DbError>;

    fn get_user(&self, user_id: i64) -> Result<Option<User>, DbError>;

    /// Targets of one user, newest first.
    fn targets_for_user(&self, user_id: i64) -> Result<Vec<Target>, DbError>;
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;

        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Users ---

    /// Add a new user and return its ID.
    pub fn add_user(&self, username: &str, email: Option<&str>) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, email, created_at) VALUES (?1, ?2, ?3)",
            params![username, email, format_db_time(&Utc::now())],
        )
        .map_err(conflict_or_sqlite)?;
        Ok(conn.last_insert_rowid())
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    ///
    /// A URL may be tracked at most once per user.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (url, user_id, category, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                target.url,
                target.user_id,
                target.category,
                format_db_time(&target.created_at),
            ],
        )
        .map_err(conflict_or_sqlite)?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, url, user_id, category, created_at FROM targets WHERE id = ?1",
            params![id],
            row_to_target,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Change the category label of a target.
    pub fn update_target_category(&self, id: i64, category: Option<&str>) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET category = ?1 WHERE id = ?2",
            params![category, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Delete a target and its probe history.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM checks WHERE target_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }
}

impl CheckStore for Store {
    fn list_all_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, url, user_id, category, created_at FROM targets ORDER BY id")?;
        let targets = stmt
            .query_map([], row_to_target)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    fn find_target_by_url(&self, url: &str) -> Result<Option<Target>, DbError> {
        let conn = self.conn()?;
        let target = conn
            .query_row(
                "SELECT id, url, user_id, category, created_at FROM targets
                 WHERE url = ?1 ORDER BY id LIMIT 1",
                params![url],
                row_to_target,
            )
            .optional()?;
        Ok(target)
    }

    fn record(&self, record: &ProbeRecord) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO checks (target_id, time, response_code, status, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.target_id,
                format_db_time(&record.timestamp),
                i64::from(record.response_code),
                record.status.as_str(),
                i64::try_from(record.latency_ms).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(())
    }

    fn history(
        &self,
        target_id: i64,
        since: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<ProbeRecord>, DbError> {
        // An empty string sorts before every stored timestamp; LIMIT -1 is unbounded.
        let since = since.map(|t| format_db_time(&t)).unwrap_or_default();
        let limit = limit.map(i64::from).unwrap_or(-1);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, time, status, response_code, latency_ms FROM checks
             WHERE target_id = ?1 AND time > ?2
             ORDER BY time DESC, id DESC LIMIT ?3",
        )?;
        let records = stmt
            .query_map(params![target_id, since, limit], row_to_record)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }

    fn users_with_targets(&self) -> Result<Vec<User>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT u.id, u.username, u.email FROM users u
             INNER JOIN targets t ON t.user_id = u.id
             ORDER BY u.id",
        )?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(users)
    }

    fn get_user(&self, user_id: i64) -> Result<Option<User>, DbError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, username, email FROM users WHERE id = ?1",
                params![user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn targets_for_user(&self, user_id: i64) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, url, user_id, category, created_at FROM targets
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let targets = stmt
            .query_map(params![user_id], row_to_target)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }
}

fn row_to_target(row: &Row<'_>) -> SqlResult<Target> {
    let created_at: String = row.get(4)?;
    Ok(Target {
        id: row.get(0)?,
        url: row.get(1)?,
        user_id: row.get(2)?,
        category: row.get(3)?,
        created_at: parse_column_time(4, &created_at)?,
    })
}

fn row_to_user(row: &Row<'_>) -> SqlResult<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
    })
}

fn row_to_record(row: &Row<'_>) -> SqlResult<ProbeRecord> {
    let time: String = row.get(1)?;
    let status: String = row.get(2)?;
    let code: i64 = row.get(3)?;
    let latency: i64 = row.get(4)?;

    Ok(ProbeRecord {
        target_id: row.get(0)?,
        timestamp: parse_column_time(1, &time)?,
        status: status
            .parse()
            .map_err(|e: String| conversion_failure(2, e))?,
        response_code: u16::try_from(code)
            .map_err(|_| conversion_failure(3, format!("response code out of range: {}", code)))?,
        latency_ms: u64::try_from(latency).unwrap_or(0),
    })
}

fn conversion_failure(column: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, msg.into())
}

fn conflict_or_sqlite(e: rusqlite::Error) -> DbError {
    match &e {
        rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::ConstraintViolation => {
            DbError::Conflict(msg.clone().unwrap_or_else(|| err.to_string()))
        }
        _ => DbError::Sqlite(e),
    }
}

fn parse_column_time(column: usize, s: &str) -> SqlResult<DateTime<Utc>> {
    parse_db_time(s).ok_or_else(|| conversion_failure(column, format!("bad timestamp: {}", s)))
}

/// Format a timestamp so that lexical order matches chronological order.
pub fn format_db_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn new_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn add_target(store: &Store, user_id: i64, url: &str) -> Target {
        let mut target = Target {
            url: url.to_string(),
            user_id,
            ..Default::default()
        };
        store.add_target(&mut target).unwrap();
        target
    }

    fn record_at(target_id: i64, timestamp: DateTime<Utc>, status: ProbeStatus) -> ProbeRecord {
        ProbeRecord {
            target_id,
            timestamp,
            status,
            response_code: if status.is_success() { 200 } else { 503 },
            latency_ms: 12,
        }
    }

    #[test]
    fn test_target_crud() {
        let (_tmp, store) = new_store();
        let user = store.add_user("alice", Some("alice@example.com")).unwrap();

        let target = add_target(&store, user, "https://example.com");
        assert!(target.id > 0);

        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched.url, "https://example.com");
        assert_eq!(fetched.category, None);

        store.update_target_category(target.id, Some("prod")).unwrap();
        assert_eq!(store.get_target(target.id).unwrap().category.as_deref(), Some("prod"));

        store.delete_target(target.id).unwrap();
        assert!(matches!(store.get_target(target.id), Err(DbError::NotFound)));
        assert!(matches!(store.delete_target(target.id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_duplicate_url_per_user_conflicts() {
        let (_tmp, store) = new_store();
        let alice = store.add_user("alice", None).unwrap();
        let bob = store.add_user("bob", None).unwrap();

        add_target(&store, alice, "https://example.com");
        add_target(&store, bob, "https://example.com");

        let mut dup = Target {
            url: "https://example.com".to_string(),
            user_id: alice,
            ..Default::default()
        };
        assert!(matches!(store.add_target(&mut dup), Err(DbError::Conflict(_))));

        let found = store.find_target_by_url("https://example.com").unwrap().unwrap();
        assert_eq!(found.user_id, alice);
        assert!(store.find_target_by_url("https://nope.example").unwrap().is_none());
    }

    #[test]
    fn test_history_is_most_recent_first() {
        let (_tmp, store) = new_store();
        let user = store.add_user("alice", None).unwrap();
        let target = add_target(&store, user, "https://example.com");

        let now = Utc::now();
        for hours in [3, 1, 5, 2] {
            store
                .record(&record_at(target.id, now - Duration::hours(hours), ProbeStatus::Success))
                .unwrap();
        }

        let history = store.history(target.id, None, None).unwrap();
        assert_eq!(history.len(), 4);
        assert!(history.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(history[0].timestamp, now - Duration::hours(1));

        let limited = store.history(target.id, None, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].timestamp, now - Duration::hours(2));

        let recent = store
            .history(target.id, Some(now - Duration::hours(3)), None)
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn test_record_round_trips_fields() {
        let (_tmp, store) = new_store();
        let user = store.add_user("alice", None).unwrap();
        let target = add_target(&store, user, "https://example.com");

        let record = ProbeRecord {
            target_id: target.id,
            timestamp: Utc::now(),
            status: ProbeStatus::Error,
            response_code: 0,
            latency_ms: 30_000,
        };
        store.record(&record).unwrap();

        let history = store.history(target.id, None, None).unwrap();
        assert_eq!(history, vec![record]);
    }

    #[test]
    fn test_record_requires_existing_target() {
        let (_tmp, store) = new_store();
        let orphan = record_at(42, Utc::now(), ProbeStatus::Success);
        assert!(store.record(&orphan).is_err());
    }

    #[test]
    fn test_delete_target_cascades_history() {
        let (_tmp, store) = new_store();
        let user = store.add_user("alice", None).unwrap();
        let target = add_target(&store, user, "https://example.com");
        store
            .record(&record_at(target.id, Utc::now(), ProbeStatus::Success))
            .unwrap();

        store.delete_target(target.id).unwrap();
        assert!(store.history(target.id, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_users_with_targets() {
        let (_tmp, store) = new_store();
        let alice = store.add_user("alice", Some("alice@example.com")).unwrap();
        let _idle = store.add_user("idle", None).unwrap();
        let bob = store.add_user("bob", None).unwrap();

        add_target(&store, alice, "https://a.example");
        add_target(&store, alice, "https://b.example");
        add_target(&store, bob, "https://c.example");

        let users = store.users_with_targets().unwrap();
        let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![alice, bob]);

        assert_eq!(store.targets_for_user(alice).unwrap().len(), 2);
        assert_eq!(
            store.get_user(alice).unwrap().unwrap().email.as_deref(),
            Some("alice@example.com")
        );
        assert!(store.get_user(999).unwrap().is_none());
    }
}
