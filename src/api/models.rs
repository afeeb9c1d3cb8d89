use serde::{Deserialize, Serialize};

/// 接口层统一错误，可直接序列化返回
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error_type: String,
    pub message: String,
}

impl ApiError {
    pub(crate) fn camera_unavailable() -> Self {
        Self {
            error_type: "CameraUnavailable".to_string(),
            message: "Camera not available".to_string(),
        }
    }

    pub(crate) fn capture_failed(e: String) -> Self {
        Self {
            error_type: "CaptureFailed".to_string(),
            message: format!("Failed to capture frame: {}", e),
        }
    }

    pub(crate) fn invalid_session() -> Self {
        Self {
            error_type: "InvalidSession".to_string(),
            message: "Session metadata must be a JSON object".to_string(),
        }
    }

    pub(crate) fn queue_error(e: String) -> Self {
        Self {
            error_type: "QueueError".to_string(),
            message: format!("Failed to read input directory: {}", e),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub success: bool,
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub camera_initialized: bool,
    pub capture_mode: String,
    pub periodic_enabled: bool,
    pub capture_state: String,
    pub pending_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicResponse {
    pub periodic_enabled: bool,
}
