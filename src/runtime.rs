//! 组件装配与启停顺序
//!
//! 启动：建目录 → 相机探测（失败不阻止其余部分）→ 定时抓拍 → 推理监控。
//! 关闭：先停两个生产者，再停消费者。

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::api::Controls;
use crate::core::capture::{
    CaptureError, CaptureLoop, CaptureRequest, CaptureTiming, FrameSource, GstFrameSource,
};
use crate::core::config::{CaptureSettings, ConfigError, Settings};
use crate::core::extraction::{PromptSpec, Validator};
use crate::core::inference::{DispatchError, InferenceDispatcher};
use crate::core::pipeline::{ExtractionPipeline, PipelineMonitor, SweepReport};
use crate::core::queue::{QueueError, WorkQueue};
use crate::core::scheduler::PeriodicScheduler;
use crate::core::store::{ExtractionStore, SqliteStore, StoreError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("failed to start worker thread: {0}")]
    Io(#[from] io::Error),
}

/// 装配所需的全部零件，测试里可以换成 mock
pub struct Parts {
    pub source: Arc<dyn FrameSource>,
    pub request: CaptureRequest,
    pub capture: CaptureSettings,
    pub dispatcher: InferenceDispatcher,
    pub prompts: Vec<PromptSpec>,
    pub validator: Validator,
    pub store: Arc<dyn ExtractionStore>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub normalized: usize,
    pub failed: usize,
    pub rows: usize,
}

pub struct Pitwall {
    capture: Arc<CaptureLoop>,
    scheduler: Arc<PeriodicScheduler>,
    pipeline: Arc<ExtractionPipeline>,
    monitor: PipelineMonitor,
    store: Arc<dyn ExtractionStore>,
    controls: Controls,
}

impl Pitwall {
    pub fn from_settings(settings: &Settings) -> Result<Self, RuntimeError> {
        let camera = settings.camera()?;
        let capture = settings.capture()?;
        let llm = settings.llm()?;
        let store = SqliteStore::open(&settings.database().path)?;

        Self::new(Parts {
            source: Arc::new(GstFrameSource::new(camera.source.clone())),
            request: camera.request(),
            capture,
            dispatcher: InferenceDispatcher::from_config(&llm.backend)?,
            validator: llm.validator(),
            prompts: llm.prompts,
            store: Arc::new(store),
        })
    }

    pub fn new(parts: Parts) -> Result<Self, RuntimeError> {
        let dirs = parts.capture.dirs.clone();
        let queue = WorkQueue::new(dirs.clone());
        queue.ensure_dirs()?;
        info!(
            "📂 Directories ready: input={}, processed={}, failed={}",
            dirs.input.display(),
            dirs.processed.display(),
            dirs.failed.display()
        );

        let capture = Arc::new(CaptureLoop::new(
            parts.source,
            parts.request,
            CaptureTiming::for_fps(parts.request.fps),
        ));
        let scheduler = Arc::new(PeriodicScheduler::new(
            capture.frame_buffer(),
            &dirs.input,
            parts.capture.interval,
            parts.capture.mode,
        ));
        let pipeline = Arc::new(
            ExtractionPipeline::new(queue, parts.dispatcher, parts.prompts)
                .with_validator(parts.validator)
                .with_store(Arc::clone(&parts.store)),
        );
        let monitor = PipelineMonitor::new(Arc::clone(&pipeline));
        let controls = Controls::new(
            Arc::clone(&capture),
            Arc::clone(&scheduler),
            Arc::clone(&pipeline),
            &dirs.input,
        );

        Ok(Self {
            capture,
            scheduler,
            pipeline,
            monitor,
            store: parts.store,
            controls,
        })
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn pipeline(&self) -> &Arc<ExtractionPipeline> {
        &self.pipeline
    }

    /// 相机探测失败只记日志，推理监控照常启动
    pub fn start(&self) -> Result<(), RuntimeError> {
        if let Err(e) = self.capture.start() {
            warn!("⚠️ Camera not available, continuing without capture: {}", e);
        }
        self.scheduler.start()?;
        self.monitor.start()?;
        info!("🚀 Pipeline running (mode {})", self.scheduler.mode());
        Ok(())
    }

    pub fn shutdown(&self) {
        info!("Shutting down...");
        if !self.scheduler.stop() {
            error!("❌ Periodic capture did not stop in time");
        }
        self.capture.stop();
        if !self.monitor.stop() {
            error!("❌ Inference monitor did not stop in time");
        }
        info!("👋 Shutdown complete");
    }

    pub fn run_once(&self) -> Result<SweepReport, RuntimeError> {
        Ok(self.pipeline.run_sweep()?)
    }

    /// 对所有 `new` 状态的记录做一次行级规范化
    pub fn normalize_pending(&self) -> Result<NormalizeReport, RuntimeError> {
        normalize_pending(self.store.as_ref())
    }
}

pub fn normalize_pending(store: &dyn ExtractionStore) -> Result<NormalizeReport, RuntimeError> {
    let mut report = NormalizeReport::default();
    for record in store.list_unprocessed()? {
        match store.parse_and_normalize(&record) {
            Ok(rows) => {
                report.normalized += 1;
                report.rows += rows.len();
            }
            Err(e) => {
                warn!("⚠️ Record {} ({}) not normalized: {}", record.id, record.image_filename, e);
                report.failed += 1;
            }
        }
    }
    info!(
        "📊 Normalized {} records ({} rows), {} failed",
        report.normalized, report.rows, report.failed
    );
    Ok(report)
}

/// 不启动采集循环，直接抓一帧放进 input
pub fn capture_once(
    source: &dyn FrameSource,
    request: &CaptureRequest,
    input_dir: &std::path::Path,
) -> Result<PathBuf, RuntimeError> {
    let frame = source
        .capture_frame(request)
        .ok_or(CaptureError::NotInitialized)?;
    let path = frame.save_new(input_dir, "manual")?;
    info!("📸 Frame saved to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capture::MockFrameSource;
    use crate::core::inference::ScriptedBackend;
    use crate::core::queue::{list_images, QueueDirs};
    use crate::core::scheduler::CaptureMode;
    use crate::core::store::MemoryStore;
    use std::path::Path;
    use std::time::Duration;

    fn parts(root: &Path, source: MockFrameSource, store: Arc<MemoryStore>) -> Parts {
        Parts {
            source: Arc::new(source),
            request: CaptureRequest {
                width: 8,
                height: 8,
                fps: 30,
                rotation: 90,
            },
            capture: CaptureSettings {
                mode: CaptureMode::Manual,
                interval: Duration::from_secs(30),
                dirs: QueueDirs::under(root),
            },
            dispatcher: InferenceDispatcher::with_backend(Box::new(ScriptedBackend::always(
                "{\"lap_number\": 7}",
            ))),
            prompts: vec![PromptSpec::new("current_lap", "lap?")],
            validator: Validator::new(),
            store,
        }
    }

    #[test]
    fn test_start_survives_missing_camera() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pitwall = Pitwall::new(parts(dir.path(), MockFrameSource::failing(), store)).unwrap();
        assert!(dir.path().join("failed").is_dir());

        pitwall.start().unwrap();
        let status = crate::api::status(pitwall.controls()).unwrap();
        assert!(!status.camera_initialized);
        assert_eq!(status.capture_state, "stopped");
        pitwall.shutdown();
    }

    #[test]
    fn test_run_once_and_normalize() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pitwall = Pitwall::new(parts(dir.path(), MockFrameSource::new(), store.clone())).unwrap();
        std::fs::write(dir.path().join("input").join("x.jpg"), b"img").unwrap();

        let report = pitwall.run_once().unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(store.len(), 1);

        // 只有圈数没有计时表，规范化失败
        let normalized = pitwall.normalize_pending().unwrap();
        assert_eq!(normalized.failed, 1);
        assert!(store.list_unprocessed().unwrap().is_empty());
    }

    #[test]
    fn test_capture_once_writes_manual_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        let source = MockFrameSource::new();
        let path = capture_once(&source, &CaptureRequest::default(), &input).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("manual_"));
        assert_eq!(list_images(&input).unwrap().len(), 1);

        let failing = MockFrameSource::failing();
        assert!(capture_once(&failing, &CaptureRequest::default(), &input).is_err());
    }
}
