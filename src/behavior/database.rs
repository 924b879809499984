use super::TrackAnalytics;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Play,
    Skip,
}

pub struct AnalyticsDatabase {
    conn: Connection,
}

impl AnalyticsDatabase {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS track_analytics (
                track_id TEXT PRIMARY KEY,
                play_count INTEGER NOT NULL DEFAULT 0 CHECK (play_count >= 0),
                skip_count INTEGER NOT NULL DEFAULT 0 CHECK (skip_count >= 0),
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Bump one counter by one, creating the row on first sight. Single statement, so atomic.
    pub fn increment(&self, track_id: &str, counter: Counter, at: DateTime<Utc>) -> Result<TrackAnalytics> {
        let (plays, skips): (i64, i64) = match counter {
            Counter::Play => (1, 0),
            Counter::Skip => (0, 1),
        };

        self.conn.execute(
            "INSERT INTO track_analytics (track_id, play_count, skip_count, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(track_id) DO UPDATE SET
                play_count = play_count + excluded.play_count,
                skip_count = skip_count + excluded.skip_count,
                updated_at = excluded.updated_at",
            params![track_id, plays, skips, at.to_rfc3339()],
        )?;

        self.get(track_id)?.ok_or_else(|| {
            crate::error::CoreError::Persistence(format!("analytics row for {} vanished", track_id))
        })
    }

    pub fn get(&self, track_id: &str) -> Result<Option<TrackAnalytics>> {
        let mut stmt = self.conn.prepare(
            "SELECT track_id, play_count, skip_count, updated_at
             FROM track_analytics WHERE track_id = ?1",
        )?;

        let record = stmt
            .query_row(params![track_id], row_to_analytics)
            .optional()?;

        Ok(record)
    }

    pub fn get_many(&self, track_ids: &[&str]) -> Result<HashMap<String, TrackAnalytics>> {
        let mut stmt = self.conn.prepare(
            "SELECT track_id, play_count, skip_count, updated_at
             FROM track_analytics WHERE track_id = ?1",
        )?;

        let mut records = HashMap::with_capacity(track_ids.len());
        for &track_id in track_ids {
            if records.contains_key(track_id) {
                continue;
            }
            if let Some(record) = stmt.query_row(params![track_id], row_to_analytics).optional()? {
                records.insert(track_id.to_string(), record);
            }
        }

        Ok(records)
    }

    pub fn all(&self) -> Result<Vec<TrackAnalytics>> {
        let mut stmt = self.conn.prepare(
            "SELECT track_id, play_count, skip_count, updated_at
             FROM track_analytics ORDER BY updated_at DESC",
        )?;

        let records = stmt
            .query_map([], row_to_analytics)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

fn row_to_analytics(row: &Row) -> rusqlite::Result<TrackAnalytics> {
    let play_count: i64 = row.get(1)?;
    let skip_count: i64 = row.get(2)?;
    let updated_at_str: String = row.get(3)?;

    let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(TrackAnalytics {
        track_id: row.get(0)?,
        play_count: u64::try_from(play_count).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, Box::new(e))
        })?,
        skip_count: u64::try_from(skip_count).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e))
        })?,
        updated_at,
    })
}
