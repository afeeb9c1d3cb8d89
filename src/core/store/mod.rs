//! 持久化协作方
//!
//! 流水线只依赖 `ExtractionStore` 这组签名；SQLite 实现供二进制使用，
//! 内存实现供测试使用。

mod memory;
mod normalize;
mod sqlite;

pub use memory::MemoryStore;
pub use normalize::{normalize_rows, TimingRow};
pub use sqlite::SqliteStore;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::extraction::ExtractionResult;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("cannot normalize record {id}: {reason}")]
    Normalize { id: i64, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    New,
    Normalized,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::New => "new",
            ProcessingStatus::Normalized => "normalized",
            ProcessingStatus::Error => "error",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ProcessingStatus::New),
            "normalized" => Ok(ProcessingStatus::Normalized),
            "error" => Ok(ProcessingStatus::Error),
            other => Err(StoreError::Unavailable(format!(
                "unknown processing status '{}'",
                other
            ))),
        }
    }
}

/// 已入库的一条聚合结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredExtraction {
    pub id: i64,
    pub timestamp: String,
    pub image_filename: String,
    pub lap_number: Option<i64>,
    pub table_type: Option<String>,
    pub extractions: Value,
    pub session: Option<Value>,
    pub status: ProcessingStatus,
}

impl StoredExtraction {
    pub fn from_result(id: i64, result: &ExtractionResult) -> Self {
        Self {
            id,
            timestamp: result.timestamp.clone(),
            image_filename: result.image_filename.clone(),
            lap_number: result.lap_number(),
            table_type: result.table_type(),
            extractions: Value::Object(result.extractions.clone()),
            session: result.session.clone(),
            status: ProcessingStatus::New,
        }
    }
}

pub trait ExtractionStore: Send + Sync {
    /// 保存一条聚合结果，返回记录 id
    fn save(&self, result: &ExtractionResult) -> Result<i64, StoreError>;

    /// 状态为 new 的记录，按时间戳升序
    fn list_unprocessed(&self) -> Result<Vec<StoredExtraction>, StoreError>;

    fn update_status(&self, id: i64, status: ProcessingStatus) -> Result<(), StoreError>;

    /// 从聚合 JSON 派生每位车手一行的计时数据
    fn parse_and_normalize(&self, record: &StoredExtraction) -> Result<Vec<TimingRow>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ProcessingStatus::New,
            ProcessingStatus::Normalized,
            ProcessingStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert!("done".parse::<ProcessingStatus>().is_err());
    }
}
