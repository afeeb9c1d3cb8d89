//! 目录即队列
//!
//! input / processed / failed 三个兄弟目录，文件所在目录就是它的状态。
//! 已认领的文件名记在进程内集合里，同一进程生命周期内每个文件最多处理一次；
//! 重启后 input 里剩下的文件会被重新处理。

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info};
use thiserror::Error;

pub const IMAGE_SUFFIXES: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to list {dir}: {source}")]
    List { dir: PathBuf, source: io::Error },
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDirs {
    pub input: PathBuf,
    pub processed: PathBuf,
    pub failed: PathBuf,
}

impl QueueDirs {
    pub fn under(root: &Path) -> Self {
        Self {
            input: root.join("input"),
            processed: root.join("processed"),
            failed: root.join("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Failed,
}

pub fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            IMAGE_SUFFIXES.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub struct WorkQueue {
    dirs: QueueDirs,
    claimed: HashSet<String>,
}

impl WorkQueue {
    pub fn new(dirs: QueueDirs) -> Self {
        Self {
            dirs,
            claimed: HashSet::new(),
        }
    }

    pub fn dirs(&self) -> &QueueDirs {
        &self.dirs
    }

    pub fn ensure_dirs(&self) -> Result<(), QueueError> {
        for dir in [&self.dirs.input, &self.dirs.processed, &self.dirs.failed] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// 列出 input 中尚未认领的图片，顺序即目录列举顺序
    pub fn poll(&self) -> Result<Vec<WorkItem>, QueueError> {
        Ok(list_images(&self.dirs.input)?
            .into_iter()
            .filter(|item| !self.claimed.contains(&item.file_name))
            .collect())
    }

    /// 首次认领返回 true
    pub fn claim(&mut self, item: &WorkItem) -> bool {
        self.claimed.insert(item.file_name.clone())
    }

    #[cfg(test)]
    fn is_claimed(&self, file_name: &str) -> bool {
        self.claimed.contains(file_name)
    }

    /// 单次 rename 移入终态目录，不做 copy+delete
    ///
    /// 终态目录里已有同名文件时换成 `<stem>_<n>.<ext>`，不覆盖。
    pub fn commit(&self, item: &WorkItem, outcome: Outcome) -> Result<PathBuf, QueueError> {
        let dest_dir = match outcome {
            Outcome::Processed => &self.dirs.processed,
            Outcome::Failed => &self.dirs.failed,
        };
        let dest = free_destination(dest_dir, &item.file_name);

        fs::rename(&item.path, &dest).map_err(|source| {
            error!("❌ Failed to move file {}: {}", item.path.display(), source);
            QueueError::Move {
                from: item.path.clone(),
                to: dest.clone(),
                source,
            }
        })?;

        info!("📦 Moved {} to {}", item.path.display(), dest.display());
        Ok(dest)
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.poll()?.len())
    }
}

fn free_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1u32..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

pub fn list_images(dir: &Path) -> Result<Vec<WorkItem>, QueueError> {
    let entries = fs::read_dir(dir).map_err(|source| QueueError::List {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut items = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| QueueError::List {
            dir: dir.to_path_buf(),
            source,
        })?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        // 写入中的 .part 临时文件以点开头
        if file_name.starts_with('.') || !is_image_file(&file_name) {
            continue;
        }
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            items.push(WorkItem {
                file_name,
                path: entry.path(),
            });
        }
    }
    Ok(items)
}
