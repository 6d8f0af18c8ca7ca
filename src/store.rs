use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::measurement::{DeviceId, Reading};

pub const DB_FILE: &str = "./home-env-log.db";

/// Lookback window for the reference reading.
pub const TREND_WINDOW: Duration = Duration::hours(3);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid timestamp {0:?} in store")]
    Timestamp(String),

    #[error("Query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Store worker failed: {0}")]
    Worker(String),
}

/// Source of historical readings.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Most recent reading of `series` for `device` taken at or before `cutoff`.
    async fn reference_reading(
        &self,
        device: &DeviceId,
        series: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init(&self, device: &DeviceId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{device}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                measurement TEXT NOT NULL,
                value REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS "{device}_measurement_time"
                ON "{device}" (measurement, time);
            "#
        ))?;
        Ok(())
    }

    #[cfg(test)]
    pub fn insert(
        &self,
        device: &DeviceId,
        series: &str,
        time: DateTime<Utc>,
        value: f64,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(r#"INSERT INTO "{device}" (time, measurement, value) VALUES (?1, ?2, ?3)"#),
            rusqlite::params![format_time(time), series, value],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Worker("connection mutex poisoned".to_owned()))
    }

    fn query(
        &self,
        device: &DeviceId,
        series: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    r#"
                    SELECT time, value FROM "{device}"
                    WHERE measurement = ?1 AND julianday(time) <= julianday(?2)
                    ORDER BY julianday(time) DESC
                    LIMIT 1"#
                ),
                rusqlite::params![series, format_time(cutoff)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
            )
            .optional()?;

        let Some((time, pressure)) = row else {
            return Ok(None);
        };
        let timestamp = DateTime::parse_from_rfc3339(&time)
            .map_err(|_| StoreError::Timestamp(time.clone()))?
            .with_timezone(&Utc);

        Ok(Some(Reading {
            device: device.clone(),
            timestamp,
            pressure,
        }))
    }
}

#[async_trait]
impl ReferenceStore for SqliteStore {
    async fn reference_reading(
        &self,
        device: &DeviceId,
        series: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError> {
        let store = self.clone();
        let device = device.clone();
        let series = series.to_owned();
        tokio::task::spawn_blocking(move || store.query(&device, &series, cutoff))
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

// Rows may carry any RFC 3339 offset; queries compare via `julianday`.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
