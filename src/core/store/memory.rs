use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::normalize::{normalize_rows, TimingRow};
use super::{ExtractionStore, ProcessingStatus, StoreError, StoredExtraction};
use crate::core::extraction::ExtractionResult;

/// 进程内存储，可注入保存失败
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<StoredExtraction>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 save 全部失败，模拟存储故障
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<StoredExtraction> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<StoredExtraction>>, StoreError> {
        self.records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl ExtractionStore for MemoryStore {
    fn save(&self, result: &ExtractionResult) -> Result<i64, StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected save failure".to_string()));
        }
        let mut records = self.lock()?;
        let id = records.len() as i64 + 1;
        records.push(StoredExtraction::from_result(id, result));
        Ok(id)
    }

    fn list_unprocessed(&self) -> Result<Vec<StoredExtraction>, StoreError> {
        let mut pending: Vec<StoredExtraction> = self
            .lock()?
            .iter()
            .filter(|r| r.status == ProcessingStatus::New)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(pending)
    }

    fn update_status(&self, id: i64, status: ProcessingStatus) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        record.status = status;
        Ok(())
    }

    fn parse_and_normalize(&self, record: &StoredExtraction) -> Result<Vec<TimingRow>, StoreError> {
        match normalize_rows(record) {
            Ok(rows) => {
                self.update_status(record.id, ProcessingStatus::Normalized)?;
                Ok(rows)
            }
            Err(e) => {
                self.update_status(record.id, ProcessingStatus::Error)?;
                Err(e)
            }
        }
    }
}
