//! SQLite persistence for locotrack-daemon.
//!
//! This is the single-writer store backing the daemon: one append-only
//! `history` table of positions, indexed by asset and creation time. Rows
//! outside the retention window are filtered on read and deleted by the
//! periodic reaper.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use locotrack_core::{HistoryStore, TrackError};
use locotrack_daemon_protocol::{HistoryRecord, Position, TelemetryPoint};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::PathBuf;

pub struct Db {
    path: PathBuf,
    retention: Duration,
}

impl Db {
    pub fn new(path: PathBuf, retention: Duration) -> Result<Self, String> {
        let db = Self { path, retention };
        db.init_schema()?;
        Ok(db)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Appends a point. `created_at` never goes backwards for an asset, so
    /// insertion order and creation-time order agree even under clock skew.
    pub fn insert_point_at(
        &self,
        asset_id: &str,
        point: &TelemetryPoint,
        now: DateTime<Utc>,
    ) -> Result<HistoryRecord, String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin history insert: {}", err))?;

            let latest: Option<String> = tx
                .query_row(
                    "SELECT MAX(created_at) FROM history WHERE asset_id = ?1",
                    params![asset_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(|err| format!("Failed to query latest history timestamp: {}", err))?
                .flatten();
            let created_at = match latest.as_deref().and_then(parse_rfc3339) {
                Some(latest) if latest > now => latest,
                _ => now,
            };

            tx.execute(
                "INSERT INTO history (asset_id, lat, lng, station, event, speed, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    asset_id,
                    point.position.lat,
                    point.position.lng,
                    point.station,
                    point.event,
                    point.speed,
                    format_timestamp(created_at)
                ],
            )
            .map_err(|err| format!("Failed to insert history point: {}", err))?;
            tx.commit()
                .map_err(|err| format!("Failed to commit history insert: {}", err))?;

            Ok(HistoryRecord {
                asset_id: asset_id.to_string(),
                point: point.clone(),
                created_at,
            })
        })
    }

    pub fn list_points_since(
        &self,
        asset_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT asset_id, lat, lng, station, event, speed, created_at \
                     FROM history \
                     WHERE asset_id = ?1 AND created_at >= ?2 \
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(|err| format!("Failed to prepare history query: {}", err))?;

            let rows = stmt
                .query_map(params![asset_id, format_timestamp(cutoff)], decode_record)
                .map_err(|err| format!("Failed to query history: {}", err))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(|err| format!("Failed to decode history row: {}", err))?);
            }
            Ok(records)
        })
    }

    pub fn list_points_at(
        &self,
        asset_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, String> {
        self.list_points_since(asset_id, self.cutoff(now))
    }

    /// Start of the retention window; saturates instead of overflowing.
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Deletes rows older than the retention window. Returns the number removed.
    pub fn prune_expired_at(&self, now: DateTime<Utc>) -> Result<usize, String> {
        let cutoff = format_timestamp(self.cutoff(now));
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM history WHERE created_at < ?1",
                params![cutoff],
            )
            .map_err(|err| format!("Failed to prune history: {}", err))
        })
    }

    pub fn prune_expired(&self) -> Result<usize, String> {
        self.prune_expired_at(Utc::now())
    }

    /// Total stored rows for an asset, including ones not yet pruned.
    #[cfg(test)]
    pub fn count_points(&self, asset_id: &str) -> Result<usize, String> {
        let count = self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM history WHERE asset_id = ?1",
                params![asset_id],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|err| format!("Failed to count history: {}", err))
        })?;
        Ok(count.max(0) as usize)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    asset_id TEXT NOT NULL,
                    lat REAL NOT NULL,
                    lng REAL NOT NULL,
                    station TEXT NOT NULL,
                    event TEXT NOT NULL,
                    speed TEXT NOT NULL,
                    created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_history_asset_created
                    ON history (asset_id, created_at);
                 CREATE INDEX IF NOT EXISTS idx_history_created
                    ON history (created_at);
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl HistoryStore for Db {
    fn list_ascending(&self, asset_id: &str) -> locotrack_core::Result<Vec<HistoryRecord>> {
        self.list_points_at(asset_id, Utc::now())
            .map_err(TrackError::StoreUnavailable)
    }

    fn insert(
        &self,
        asset_id: &str,
        point: &TelemetryPoint,
    ) -> locotrack_core::Result<HistoryRecord> {
        self.insert_point_at(asset_id, point, Utc::now())
            .map_err(TrackError::StoreUnavailable)
    }
}

fn decode_record(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let created_raw: String = row.get(6)?;
    let created_at = parse_rfc3339(&created_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            created_raw.len(),
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Invalid created_at: {}", created_raw),
            )),
        )
    })?;

    Ok(HistoryRecord {
        asset_id: row.get(0)?,
        point: TelemetryPoint {
            position: Position::new(row.get(1)?, row.get(2)?),
            station: row.get(3)?,
            event: row.get(4)?,
            speed: row.get(5)?,
        },
        created_at,
    })
}

/// Fixed-width UTC form so lexical order in SQLite equals time order.
fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
