//! Detection log.
//!
//! One record per successful detection. Appends are best-effort from the
//! caller's point of view; reads feed the analytics endpoint.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub waste_type: String,
    pub is_correct: bool,
    /// Inference throughput in frames per second.
    pub inference_speed: f64,
}

pub trait DetectionLogStore: Send + Sync {
    fn append(&self, record: &DetectionRecord) -> Result<()>;

    /// Up to `limit` records, newest first.
    fn query_recent(&self, limit: usize) -> Result<Vec<DetectionRecord>>;
}

pub struct SqliteDetectionLog {
    conn: Mutex<Connection>,
}

impl SqliteDetectionLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        // journal_mode answers with a row, so it cannot go through execute_batch.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("detection log connection poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL,
              waste_type TEXT NOT NULL,
              is_correct INTEGER NOT NULL,
              inference_speed REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_timestamp ON detections(timestamp);
            "#,
        )?;
        Ok(())
    }
}

impl DetectionLogStore for SqliteDetectionLog {
    fn append(&self, record: &DetectionRecord) -> Result<()> {
        self.lock()?.execute(
            r#"
            INSERT INTO detections(timestamp, waste_type, is_correct, inference_speed)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                record.timestamp,
                record.waste_type,
                record.is_correct,
                record.inference_speed
            ],
        )?;
        Ok(())
    }

    fn query_recent(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, waste_type, is_correct, inference_speed
            FROM detections
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok(DetectionRecord {
                timestamp: row.get(0)?,
                waste_type: row.get(1)?,
                is_correct: row.get(2)?,
                inference_speed: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDetectionLog {
    records: Mutex<Vec<DetectionRecord>>,
}

impl InMemoryDetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DetectionLogStore for InMemoryDetectionLog {
    fn append(&self, record: &DetectionRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("detection log poisoned"))?
            .push(record.clone());
        Ok(())
    }

    fn query_recent(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("detection log poisoned"))?;
        // Insertion order breaks timestamp ties, newest insert first.
        let mut out: Vec<(usize, &DetectionRecord)> = records.iter().enumerate().collect();
        out.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
        Ok(out
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
