use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::core::capture::frame::Frame;

/// 单帧抓取参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub rotation: u32,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            rotation: 0,
        }
    }
}

/// 抓帧原语：同步返回一帧或 `None`
///
/// 调用方不区分失败原因，所有失败一视同仁。
pub trait FrameSource: Send + Sync {
    fn capture_frame(&self, request: &CaptureRequest) -> Option<Frame>;
}

pub struct MockFrameSource {
    // 第 n 次调用 (从 1 开始) 是否成功
    pattern: Box<dyn Fn(u64) -> bool + Send + Sync>,
    scripted: Mutex<VecDeque<Frame>>,
    calls: AtomicU64,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self::with_pattern(|_| true)
    }

    pub fn failing() -> Self {
        Self::with_pattern(|_| false)
    }

    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(u64) -> bool + Send + Sync + 'static,
    {
        Self {
            pattern: Box::new(pattern),
            scripted: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// 依次返回给定的帧，用完后回到纯色帧
    pub fn with_frames(frames: Vec<Frame>) -> Self {
        let source = Self::new();
        if let Ok(mut queue) = source.scripted.lock() {
            queue.extend(frames);
        }
        source
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for MockFrameSource {
    fn capture_frame(&self, request: &CaptureRequest) -> Option<Frame> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !(self.pattern)(call) {
            return None;
        }

        if let Some(frame) = self.scripted.lock().ok().and_then(|mut q| q.pop_front()) {
            return Some(frame);
        }

        // 每次调用填充不同灰度，便于检测撕裂读
        let fill = (call % 251) as u8;
        let data = vec![fill; Frame::expected_len(request.width, request.height)];
        Frame::new(request.width, request.height, data).ok()
    }
}
