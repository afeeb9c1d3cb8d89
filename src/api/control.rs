use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use serde_json::Value;

use super::models::{ApiError, CaptureResponse, PeriodicResponse, StatusResponse};
use crate::core::capture::CaptureLoop;
use crate::core::pipeline::ExtractionPipeline;
use crate::core::scheduler::PeriodicScheduler;

/// 接口层需要的组件句柄
#[derive(Clone)]
pub struct Controls {
    capture: Arc<CaptureLoop>,
    scheduler: Arc<PeriodicScheduler>,
    pipeline: Arc<ExtractionPipeline>,
    input_dir: PathBuf,
}

impl Controls {
    pub fn new(
        capture: Arc<CaptureLoop>,
        scheduler: Arc<PeriodicScheduler>,
        pipeline: Arc<ExtractionPipeline>,
        input_dir: &Path,
    ) -> Self {
        Self {
            capture,
            scheduler,
            pipeline,
            input_dir: input_dir.to_path_buf(),
        }
    }
}

/// 把当前帧存成 `manual_<时间戳>.jpg` 放进 input
pub fn manual_capture(controls: &Controls) -> Result<CaptureResponse, ApiError> {
    if !controls.capture.is_initialized() {
        error!("❌ Manual capture requested but camera is not initialized");
        return Err(ApiError::camera_unavailable());
    }

    let path = controls
        .capture
        .frame_buffer()
        .capture_to_file(&controls.input_dir, "manual")
        .map_err(|e| ApiError::capture_failed(e.to_string()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    info!("✅ Manual capture successful: {}", filename);
    Ok(CaptureResponse {
        success: true,
        filename,
        message: "Frame captured successfully".to_string(),
    })
}

pub fn status(controls: &Controls) -> Result<StatusResponse, ApiError> {
    let pending_files = controls
        .pipeline
        .pending_count()
        .map_err(|e| ApiError::queue_error(e.to_string()))?;

    Ok(StatusResponse {
        camera_initialized: controls.capture.is_initialized(),
        capture_mode: controls.scheduler.mode().to_string(),
        periodic_enabled: controls.scheduler.is_enabled(),
        capture_state: controls.capture.state().label().to_string(),
        pending_files,
    })
}

/// 暂停/恢复定时抓拍，manual 模式下只改标志
pub fn set_periodic_enabled(controls: &Controls, enabled: bool) -> PeriodicResponse {
    controls.scheduler.set_enabled(enabled);
    PeriodicResponse {
        periodic_enabled: controls.scheduler.is_enabled(),
    }
}

/// 设置或清除（传 `null`）比赛/场次元数据
pub fn set_session(controls: &Controls, metadata: Value) -> Result<(), ApiError> {
    match metadata {
        Value::Null => {
            controls.pipeline.session().clear();
            info!("Session metadata cleared");
            Ok(())
        }
        Value::Object(_) => {
            info!("🏁 Session metadata updated: {}", metadata);
            controls.pipeline.session().set(metadata);
            Ok(())
        }
        _ => Err(ApiError::invalid_session()),
    }
}
