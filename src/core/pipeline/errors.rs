use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::extraction::ExtractionError;
use crate::core::inference::DispatchError;
use crate::core::store::StoreError;

/// 失败日志和运维日志里使用的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    CaptureFailure,
    DispatchTimeout,
    DispatchRequestError,
    DispatchEmptyResponse,
    MalformedResponse,
    ValidationFailure,
    #[serde(rename = "DATABASE_ERROR")]
    PersistenceFailure,
    MonitorLoopException,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CaptureFailure => "CAPTURE_FAILURE",
            ErrorKind::DispatchTimeout => "DISPATCH_TIMEOUT",
            ErrorKind::DispatchRequestError => "DISPATCH_REQUEST_ERROR",
            ErrorKind::DispatchEmptyResponse => "DISPATCH_EMPTY_RESPONSE",
            ErrorKind::MalformedResponse => "MALFORMED_RESPONSE",
            ErrorKind::ValidationFailure => "VALIDATION_FAILURE",
            ErrorKind::PersistenceFailure => "DATABASE_ERROR",
            ErrorKind::MonitorLoopException => "MONITOR_LOOP_EXCEPTION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个文件处理失败的原因
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{extraction_type}: {source}")]
    Dispatch {
        extraction_type: String,
        source: DispatchError,
    },
    #[error("{extraction_type}: failed to parse JSON response: {message}")]
    Malformed {
        extraction_type: String,
        message: String,
        response: String,
    },
    #[error("Validation failed for {extraction_type}: {source}")]
    Validation {
        extraction_type: String,
        source: ExtractionError,
        response: String,
    },
    #[error("Failed to save to database: {0}")]
    Persistence(#[from] StoreError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Dispatch { source, .. } => match source {
                DispatchError::Timeout(_) => ErrorKind::DispatchTimeout,
                DispatchError::EmptyResponse => ErrorKind::DispatchEmptyResponse,
                DispatchError::MalformedReply(_) => ErrorKind::MalformedResponse,
                DispatchError::Request(_) | DispatchError::ImageUnreadable { .. } => {
                    ErrorKind::DispatchRequestError
                }
            },
            PipelineError::Malformed { .. } => ErrorKind::MalformedResponse,
            PipelineError::Validation { .. } => ErrorKind::ValidationFailure,
            PipelineError::Persistence(_) => ErrorKind::PersistenceFailure,
        }
    }

    /// 出问题的模型原始回复
    pub fn response_data(&self) -> Option<&str> {
        match self {
            PipelineError::Malformed { response, .. }
            | PipelineError::Validation { response, .. } => Some(response),
            _ => None,
        }
    }
}
