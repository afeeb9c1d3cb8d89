//! 定时抓拍
//!
//! 按固定间隔把 FrameBuffer 的当前帧写进 input 目录，可随时暂停/恢复。
//! `manual` 模式下完全不启动。

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::capture::{CaptureError, FrameBuffer};
use crate::core::pipeline::ErrorKind;
use crate::core::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Manual,
    Periodic,
    Both,
}

impl CaptureMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureMode::Manual => "manual",
            CaptureMode::Periodic => "periodic",
            CaptureMode::Both => "both",
        }
    }

    pub fn allows_periodic(self) -> bool {
        matches!(self, CaptureMode::Periodic | CaptureMode::Both)
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(CaptureMode::Manual),
            "periodic" => Ok(CaptureMode::Periodic),
            "both" => Ok(CaptureMode::Both),
            other => Err(format!(
                "unknown capture mode '{}', expected manual|periodic|both",
                other
            )),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct PeriodicScheduler {
    buffer: Arc<FrameBuffer>,
    input_dir: PathBuf,
    interval: Duration,
    mode: CaptureMode,
    enabled: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl PeriodicScheduler {
    pub fn new(buffer: Arc<FrameBuffer>, input_dir: &Path, interval: Duration, mode: CaptureMode) -> Self {
        Self {
            buffer,
            input_dir: input_dir.to_path_buf(),
            interval,
            mode,
            enabled: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!("⏸️ Periodic capture paused");
    }

    pub fn resume(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("▶️ Periodic capture resumed");
    }

    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.resume()
        } else {
            self.pause()
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .map(|w| w.as_ref().map(Worker::is_running).unwrap_or(false))
            .unwrap_or(false)
    }

    /// 抓拍一次；暂停、manual 模式或还没有帧时跳过并返回 `None`
    pub fn tick(&self) -> Result<Option<PathBuf>, CaptureError> {
        tick_once(&self.buffer, &self.input_dir, self.mode, &self.enabled)
    }

    /// manual 模式返回 `Ok(false)`，不启动线程
    pub fn start(&self) -> io::Result<bool> {
        if !self.mode.allows_periodic() {
            info!("Capture mode is manual, periodic capture not started");
            return Ok(false);
        }

        let mut slot = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().map(Worker::is_running).unwrap_or(false) {
            return Ok(true);
        }

        let buffer = Arc::clone(&self.buffer);
        let input_dir = self.input_dir.clone();
        let enabled = Arc::clone(&self.enabled);
        let mode = self.mode;
        let interval = self.interval;

        let worker = Worker::spawn("periodic-capture", move |flag| {
            info!("⏱️ Periodic capture started (interval {:?})", interval);
            while flag.is_running() {
                if let Err(e) = tick_once(&buffer, &input_dir, mode, &enabled) {
                    warn!("⚠️ [{}] Periodic capture skipped: {}", ErrorKind::CaptureFailure, e);
                }
                if !flag.sleep(interval) {
                    break;
                }
            }
            info!("Periodic capture stopped");
        })?;
        *slot = Some(worker);
        Ok(true)
    }

    pub fn stop(&self) -> bool {
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        match worker {
            Some(mut worker) => worker.stop(Duration::from_secs(2)),
            None => true,
        }
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_once(
    buffer: &FrameBuffer,
    input_dir: &Path,
    mode: CaptureMode,
    enabled: &AtomicBool,
) -> Result<Option<PathBuf>, CaptureError> {
    if !mode.allows_periodic() || !enabled.load(Ordering::SeqCst) {
        return Ok(None);
    }
    if !buffer.has_frame() {
        debug!("No frame yet, skipping periodic capture");
        return Ok(None);
    }
    Ok(Some(buffer.capture_to_file(input_dir, "periodic")?))
}
