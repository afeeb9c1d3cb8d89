use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::normalize::{normalize_rows, TimingRow};
use super::{ExtractionStore, ProcessingStatus, StoreError, StoredExtraction};
use crate::core::extraction::ExtractionResult;

/// SQLite 结果库
///
/// `inference_results` 每张图片一行，`timing_rows` 由 `parse_and_normalize` 填充。
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        info!("📁 Database initialized at {}", db_path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {}", e)))
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS inference_results (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp         TEXT NOT NULL,
                image_filename    TEXT NOT NULL,
                lap_number        INTEGER,
                table_type        TEXT,
                data_json         TEXT NOT NULL,
                session_json      TEXT,
                processing_status TEXT NOT NULL DEFAULT 'new'
            );
            CREATE TABLE IF NOT EXISTS timing_rows (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                result_id   INTEGER NOT NULL,
                lap_number  INTEGER,
                table_type  TEXT,
                position    INTEGER,
                driver      TEXT NOT NULL,
                value       TEXT,
                FOREIGN KEY(result_id) REFERENCES inference_results(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_results_status
                ON inference_results(processing_status, timestamp);
            CREATE INDEX IF NOT EXISTS idx_rows_result
                ON timing_rows(result_id);",
        )?;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<StoredExtraction>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT id, timestamp, image_filename, lap_number, table_type, data_json,
                        session_json, processing_status
                 FROM inference_results WHERE id = ?1",
                [id],
                RawRow::from_row,
            )
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }

    pub fn timing_rows(&self, result_id: i64) -> Result<Vec<TimingRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT position, driver, value, lap_number, table_type
             FROM timing_rows WHERE result_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([result_id], |row| {
            Ok(TimingRow {
                position: row.get(0)?,
                driver: row.get(1)?,
                value: row.get(2)?,
                lap_number: row.get(3)?,
                table_type: row.get(4)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

// inference_results 的原始列
struct RawRow {
    id: i64,
    timestamp: String,
    image_filename: String,
    lap_number: Option<i64>,
    table_type: Option<String>,
    data_json: String,
    session_json: Option<String>,
    status: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            image_filename: row.get(2)?,
            lap_number: row.get(3)?,
            table_type: row.get(4)?,
            data_json: row.get(5)?,
            session_json: row.get(6)?,
            status: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<StoredExtraction, StoreError> {
        let session = match self.session_json {
            Some(text) => Some(serde_json::from_str::<Value>(&text)?),
            None => None,
        };
        Ok(StoredExtraction {
            id: self.id,
            timestamp: self.timestamp,
            image_filename: self.image_filename,
            lap_number: self.lap_number,
            table_type: self.table_type,
            extractions: serde_json::from_str(&self.data_json)?,
            session,
            status: self.status.parse()?,
        })
    }
}

impl ExtractionStore for SqliteStore {
    fn save(&self, result: &ExtractionResult) -> Result<i64, StoreError> {
        let data_json = serde_json::to_string(&result.extractions)?;
        let session_json = result
            .session
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO inference_results
                (timestamp, image_filename, lap_number, table_type, data_json, session_json, processing_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.timestamp,
                result.image_filename,
                result.lap_number(),
                result.table_type(),
                data_json,
                session_json,
                ProcessingStatus::New.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(
            "💾 Saved inference result for {} (ID: {})",
            result.image_filename, id
        );
        Ok(id)
    }

    fn list_unprocessed(&self) -> Result<Vec<StoredExtraction>, StoreError> {
        let raws = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, image_filename, lap_number, table_type, data_json,
                        session_json, processing_status
                 FROM inference_results
                 WHERE processing_status = 'new'
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt.query_map([], RawRow::from_row)?;
            let mut raws = Vec::new();
            for row in rows {
                raws.push(row?);
            }
            raws
        };
        raws.into_iter().map(RawRow::into_record).collect()
    }

    fn update_status(&self, id: i64, status: ProcessingStatus) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE inference_results SET processing_status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn parse_and_normalize(&self, record: &StoredExtraction) -> Result<Vec<TimingRow>, StoreError> {
        let rows = match normalize_rows(record) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("⚠️ Normalization failed for record {}: {}", record.id, e);
                self.update_status(record.id, ProcessingStatus::Error)?;
                return Err(e);
            }
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM timing_rows WHERE result_id = ?1", [record.id])?;
        for row in &rows {
            tx.execute(
                "INSERT INTO timing_rows (result_id, lap_number, table_type, position, driver, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    row.lap_number,
                    row.table_type,
                    row.position,
                    row.driver,
                    row.value
                ],
            )?;
        }
        let changed = tx.execute(
            "UPDATE inference_results SET processing_status = ?1 WHERE id = ?2",
            params![ProcessingStatus::Normalized.as_str(), record.id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(record.id));
        }
        tx.commit()?;

        info!(
            "📊 Normalized record {} into {} timing rows",
            record.id,
            rows.len()
        );
        Ok(rows)
    }
}
