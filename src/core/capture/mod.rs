//! 相机采集 - 生产者一侧
//!
//! 1. `FrameSource` 抓取单帧（慢、可能失败）
//! 2. `CaptureLoop` 后台循环抓帧并发布到 `FrameBuffer`
//! 3. `FrameBuffer` 持有最新一帧，读者拿到的是独立副本

pub mod buffer;
pub mod capture_loop;
pub mod frame;
pub mod gst;
pub mod source;

pub use buffer::FrameBuffer;
pub use capture_loop::{CaptureLoop, CaptureState, CaptureTiming};
pub use frame::Frame;
pub use gst::GstFrameSource;
pub use source::{CaptureRequest, FrameSource, MockFrameSource};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("camera not initialized")]
    NotInitialized,
    #[error("no frame available yet")]
    NoFrame,
    #[error("unexpected frame size: {actual} bytes, expected {expected}")]
    BadFrameSize { actual: usize, expected: usize },
    #[error("{0} already exists")]
    AlreadyExists(std::path::PathBuf),
    #[error("unsupported rotation: {0} degrees")]
    UnsupportedRotation(u32),
    #[error("unsupported image format for {0}")]
    UnsupportedFormat(String),
    #[error("frame encoding failed: {0}")]
    Encode(String),
    #[error("capture command failed: {0}")]
    Command(String),
    #[error("capture timed out after {0:?}")]
    Timeout(std::time::Duration),
}
