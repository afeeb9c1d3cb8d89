use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{error, info};
use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, PipelineError};
use crate::core::extraction::iso_timestamp;

/// 失败日志，写一次不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: String,
    pub image_filename: String,
    pub error_type: ErrorKind,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<String>,
}

impl ErrorRecord {
    pub fn new(image_filename: &str, kind: ErrorKind, message: String) -> Self {
        Self {
            timestamp: iso_timestamp(),
            image_filename: image_filename.to_string(),
            error_type: kind,
            error_message: message,
            response_data: None,
        }
    }

    pub fn from_error(image_filename: &str, err: &PipelineError) -> Self {
        Self {
            response_data: err.response_data().map(str::to_string),
            ..Self::new(image_filename, err.kind(), err.to_string())
        }
    }
}

/// 把 `ErrorRecord` 写成 failed 目录下的 `error_<时间戳>.json`
pub struct ErrorLog {
    dir: PathBuf,
}

impl ErrorLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, record: &ErrorRecord) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();

        // create_new 防止同一微秒内的两条记录互相覆盖
        let mut attempt = 0u32;
        let (path, file) = loop {
            let name = if attempt == 0 {
                format!("error_{}.json", stamp)
            } else {
                format!("error_{}_{}.json", stamp, attempt)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        };

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;
        Ok(path)
    }

    /// 写失败只记日志，不影响文件流转
    pub fn record(&self, record: &ErrorRecord) -> Option<PathBuf> {
        match self.write(record) {
            Ok(path) => {
                info!("📝 Error log saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!(
                    "❌ Failed to save error log for {}: {}",
                    record.image_filename, e
                );
                None
            }
        }
    }
}

pub fn list_error_logs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| {
                    let n = n.to_string_lossy();
                    n.starts_with("error_") && n.ends_with(".json")
                })
                .unwrap_or(false)
        })
        .collect();
    logs.sort();
    Ok(logs)
}
