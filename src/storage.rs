//! Storage layer for cooldowns and the processing cursor
//!
//! Provides a persistent SQLite store. It owns two tables:
//! `cooldowns(user_key, last_accepted_at)` and `state(key, value)`, the latter
//! holding the id of the last processed message under `last_message_id`.

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const CURSOR_KEY: &str = "last_message_id";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cooldowns (
        user_key TEXT PRIMARY KEY,
        last_accepted_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS state (
        key TEXT PRIMARY KEY,
        value TEXT
    );
";

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error reported by SQLite
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored timestamp could not be parsed
    #[error("Corrupt timestamp for {user_key}: {value}")]
    CorruptTimestamp {
        /// User whose record is unreadable
        user_key: String,
        /// Raw stored value
        value: String,
    },
    /// Connection mutex was poisoned by a panicking writer
    #[error("Store connection lock poisoned")]
    Poisoned,
}

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start the clock at `start`
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Durable per-user cooldown ledger plus the processing cursor.
///
/// Every method runs a single SQL statement under the connection lock, so a
/// reader never observes a half-written record.
pub struct CooldownStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl CooldownStore {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` if the file cannot be opened or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn, clock)?;
        info!("💾 Cooldown store opened at {}", path.display());
        Ok(store)
    }

    /// In-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` if the schema cannot be created.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Id of the last processed message, if any
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub fn get_cursor(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![CURSOR_KEY],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(value)
    }

    /// Durably move the cursor to `message_id`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the write fails.
    pub fn set_cursor(&self, message_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO state (key, value) VALUES (?1, ?2)",
            params![CURSOR_KEY, message_id],
        )?;
        debug!("Cursor advanced to {}", message_id);
        Ok(())
    }

    fn last_accepted_at(&self, user_key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_accepted_at FROM cooldowns WHERE user_key = ?1",
                params![user_key],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        raw.map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| StoreError::CorruptTimestamp {
                    user_key: user_key.to_string(),
                    value,
                })
        })
        .transpose()
    }

    /// Time since the user's last accepted track, never negative
    fn elapsed_since_last(&self, user_key: &str) -> Result<Option<TimeDelta>, StoreError> {
        Ok(self
            .last_accepted_at(user_key)?
            .map(|last| (self.clock.now() - last).max(TimeDelta::zero())))
    }

    /// Whether `user_key` may queue a track under the given cooldown `window`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be read.
    pub fn can_post(&self, user_key: &str, window: Duration) -> Result<bool, StoreError> {
        Ok(match self.elapsed_since_last(user_key)? {
            None => true,
            Some(elapsed) => elapsed >= to_delta(window),
        })
    }

    /// Whole minutes left until `user_key` may post again, at least 1.
    ///
    /// A user without a record gets the full window.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be read.
    pub fn minutes_remaining(&self, user_key: &str, window: Duration) -> Result<u64, StoreError> {
        let window_minutes = window.as_secs() / 60;
        let remaining = match self.elapsed_since_last(user_key)? {
            None => window_minutes,
            Some(elapsed) => {
                let elapsed_minutes = u64::try_from(elapsed.num_minutes()).unwrap_or(0);
                window_minutes.saturating_sub(elapsed_minutes)
            }
        };
        Ok(remaining.max(1))
    }

    /// Record that `user_key` just had a track accepted
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the write fails.
    pub fn record_post(&self, user_key: &str) -> Result<(), StoreError> {
        let now = self.clock.now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cooldowns (user_key, last_accepted_at) VALUES (?1, ?2)",
            params![user_key, now],
        )?;
        Ok(())
    }
}

fn to_delta(window: Duration) -> TimeDelta {
    TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn store() -> (CooldownStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = CooldownStore::open_in_memory(clock.clone()).expect("in-memory store");
        (store, clock)
    }

    #[test]
    fn test_cursor_starts_empty_and_upserts() -> Result<(), StoreError> {
        let (store, _) = store();
        assert_eq!(store.get_cursor()?, None);
        store.set_cursor("mid-1")?;
        store.set_cursor("mid-2")?;
        assert_eq!(store.get_cursor()?.as_deref(), Some("mid-2"));
        Ok(())
    }

    #[test]
    fn test_unseen_user_can_post() -> Result<(), StoreError> {
        let (store, _) = store();
        assert!(store.can_post("alice", 20 * MINUTE)?);
        assert_eq!(store.minutes_remaining("alice", 20 * MINUTE)?, 20);
        Ok(())
    }

    #[test]
    fn test_record_post_blocks_until_window_passes() -> Result<(), StoreError> {
        let (store, clock) = store();
        store.record_post("alice")?;
        assert!(!store.can_post("alice", 20 * MINUTE)?);
        assert_eq!(store.minutes_remaining("alice", 20 * MINUTE)?, 20);

        clock.advance(5 * MINUTE + Duration::from_secs(30));
        assert!(!store.can_post("alice", 20 * MINUTE)?);
        assert_eq!(store.minutes_remaining("alice", 20 * MINUTE)?, 15);

        clock.advance(15 * MINUTE);
        assert!(store.can_post("alice", 20 * MINUTE)?);
        Ok(())
    }

    #[test]
    fn test_minutes_remaining_never_below_one() -> Result<(), StoreError> {
        let (store, clock) = store();
        store.record_post("bob")?;
        clock.advance(20 * MINUTE - Duration::from_secs(1));
        assert!(!store.can_post("bob", 20 * MINUTE)?);
        assert_eq!(store.minutes_remaining("bob", 20 * MINUTE)?, 1);
        Ok(())
    }

    #[test]
    fn test_shorter_window_applies_to_existing_record() -> Result<(), StoreError> {
        let (store, clock) = store();
        store.record_post("carol")?;
        clock.advance(6 * MINUTE);
        assert!(!store.can_post("carol", 20 * MINUTE)?);
        assert!(store.can_post("carol", 5 * MINUTE)?);
        Ok(())
    }

    #[test]
    fn test_users_are_independent() -> Result<(), StoreError> {
        let (store, _) = store();
        store.record_post("alice")?;
        assert!(store.can_post("bob", 20 * MINUTE)?);
        Ok(())
    }

    #[test]
    fn test_corrupt_timestamp_is_reported() -> Result<(), StoreError> {
        let (store, _) = store();
        store.conn()?.execute(
            "INSERT INTO cooldowns (user_key, last_accepted_at) VALUES ('dave', 'yesterday')",
            [],
        )?;
        let err = store.can_post("dave", 20 * MINUTE);
        assert!(matches!(err, Err(StoreError::CorruptTimestamp { .. })));
        Ok(())
    }
}
