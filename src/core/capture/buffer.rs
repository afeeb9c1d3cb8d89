use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{error, info};

use crate::core::capture::frame::Frame;
use crate::core::capture::CaptureError;

/// 最新一帧的共享缓冲
///
/// 锁只在拷入/拷出时持有，编码和写盘都在锁外完成。
pub struct FrameBuffer {
    latest: Mutex<Option<Frame>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
        }
    }

    pub fn publish(&self, frame: Frame) {
        match self.latest.lock() {
            Ok(mut slot) => *slot = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
    }

    /// 当前帧的深拷贝；从未发布过则为 `None`
    pub fn current(&self) -> Option<Frame> {
        match self.latest.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn has_frame(&self) -> bool {
        match self.latest.lock() {
            Ok(slot) => slot.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// 把当前帧存成 `dir` 下的新文件 `<prefix>_<时间戳>.jpg`
    pub fn capture_to_file(&self, dir: &Path, prefix: &str) -> Result<PathBuf, CaptureError> {
        let frame = self.current().ok_or_else(|| {
            error!("❌ No frame available for capture");
            CaptureError::NoFrame
        })?;

        let path = frame.save_new(dir, prefix).map_err(|e| {
            error!("❌ Failed to save frame into {}: {}", dir.display(), e);
            e
        })?;

        info!("📸 Frame captured and saved to: {}", path.display());
        Ok(path)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
