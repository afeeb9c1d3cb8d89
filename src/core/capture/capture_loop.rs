use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};

use crate::core::capture::buffer::FrameBuffer;
use crate::core::capture::source::{CaptureRequest, FrameSource};
use crate::core::capture::CaptureError;
use crate::core::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    Start,
    ProbeSucceeded,
    ProbeFailed,
    Stop,
    Joined,
}

impl CaptureState {
    /// 非法事件保持原状态
    pub fn transition(self, event: CaptureEvent) -> CaptureState {
        match (self, event) {
            (CaptureState::Stopped, CaptureEvent::Start) => CaptureState::Starting,
            (CaptureState::Starting, CaptureEvent::ProbeSucceeded) => CaptureState::Running,
            (CaptureState::Starting, CaptureEvent::ProbeFailed) => CaptureState::Stopped,
            (CaptureState::Running, CaptureEvent::Stop) => CaptureState::Stopping,
            (CaptureState::Stopping, CaptureEvent::Joined) => CaptureState::Stopped,
            (state, _) => state,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CaptureState::Stopped => "stopped",
            CaptureState::Starting => "starting",
            CaptureState::Running => "running",
            CaptureState::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureTiming {
    pub frame_interval: Duration,
    pub failure_backoff: Duration,
    pub join_timeout: Duration,
}

impl CaptureTiming {
    pub fn for_fps(fps: u32) -> Self {
        Self {
            frame_interval: Duration::from_millis(1000 / u64::from(fps.max(1))),
            ..Default::default()
        }
    }
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            failure_backoff: Duration::from_secs(1),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// 采集生产者：反复抓帧并发布到 `FrameBuffer`
pub struct CaptureLoop {
    source: Arc<dyn FrameSource>,
    request: CaptureRequest,
    timing: CaptureTiming,
    buffer: Arc<FrameBuffer>,
    state: Mutex<CaptureState>,
    initialized: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl CaptureLoop {
    pub fn new(source: Arc<dyn FrameSource>, request: CaptureRequest, timing: CaptureTiming) -> Self {
        Self {
            source,
            request,
            timing,
            buffer: Arc::new(FrameBuffer::new()),
            state: Mutex::new(CaptureState::Stopped),
            initialized: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub fn frame_buffer(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn state(&self) -> CaptureState {
        self.state.lock().map(|s| *s).unwrap_or(CaptureState::Stopped)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn apply(&self, event: CaptureEvent) -> CaptureState {
        match self.state.lock() {
            Ok(mut state) => {
                *state = state.transition(event);
                *state
            }
            Err(poisoned) => {
                let mut state = poisoned.into_inner();
                *state = state.transition(event);
                *state
            }
        }
    }

    /// 先同步探测一帧，失败则报告未初始化且不进入 RUNNING
    pub fn start(&self) -> Result<(), CaptureError> {
        if self.state() != CaptureState::Stopped {
            warn!("⚠️ Capture loop already {}", self.state().label());
            return Ok(());
        }
        self.apply(CaptureEvent::Start);

        info!(
            "🎥 Probing camera at {}x{} @ {} fps",
            self.request.width, self.request.height, self.request.fps
        );
        let probe = match self.source.capture_frame(&self.request) {
            Some(frame) => frame,
            None => {
                error!("❌ Camera initialization failed: probe capture returned no frame");
                self.initialized.store(false, Ordering::SeqCst);
                self.apply(CaptureEvent::ProbeFailed);
                return Err(CaptureError::NotInitialized);
            }
        };
        info!("✅ Probe capture ok: {}x{}", probe.width, probe.height);
        self.buffer.publish(probe);

        let source = Arc::clone(&self.source);
        let buffer = Arc::clone(&self.buffer);
        let request = self.request;
        let timing = self.timing;

        let worker = Worker::spawn("capture-loop", move |flag| {
            info!("Starting frame capture loop");
            while flag.is_running() {
                match source.capture_frame(&request) {
                    Some(frame) => {
                        buffer.publish(frame);
                        flag.sleep(timing.frame_interval);
                    }
                    None => {
                        warn!("⚠️ Failed to capture frame, retrying...");
                        flag.sleep(timing.failure_backoff);
                    }
                }
            }
        });

        match worker {
            Ok(worker) => {
                if let Ok(mut slot) = self.worker.lock() {
                    *slot = Some(worker);
                }
                self.initialized.store(true, Ordering::SeqCst);
                self.apply(CaptureEvent::ProbeSucceeded);
                info!("✅ Camera capture started");
                Ok(())
            }
            Err(e) => {
                self.apply(CaptureEvent::ProbeFailed);
                Err(CaptureError::Io(e))
            }
        }
    }

    pub fn stop(&self) {
        if self.state() != CaptureState::Running {
            return;
        }
        info!("Stopping camera capture");
        self.apply(CaptureEvent::Stop);

        let worker = self.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut worker) = worker {
            worker.stop(self.timing.join_timeout);
        }

        self.apply(CaptureEvent::Joined);
        info!("Camera capture stopped");
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capture::source::MockFrameSource;
    use std::thread;

    fn fast_timing() -> CaptureTiming {
        CaptureTiming {
            frame_interval: Duration::from_millis(5),
            failure_backoff: Duration::from_millis(20),
            join_timeout: Duration::from_secs(2),
        }
    }

    fn tiny_request() -> CaptureRequest {
        CaptureRequest {
            width: 8,
            height: 8,
            fps: 30,
            rotation: 0,
        }
    }

    #[test]
    fn test_state_transitions() {
        let s = CaptureState::Stopped;
        assert_eq!(s.transition(CaptureEvent::Start), CaptureState::Starting);
        assert_eq!(
            CaptureState::Starting.transition(CaptureEvent::ProbeFailed),
            CaptureState::Stopped
        );
        assert_eq!(
            CaptureState::Starting.transition(CaptureEvent::ProbeSucceeded),
            CaptureState::Running
        );
        assert_eq!(
            CaptureState::Running.transition(CaptureEvent::Stop),
            CaptureState::Stopping
        );
        assert_eq!(
            CaptureState::Stopping.transition(CaptureEvent::Joined),
            CaptureState::Stopped
        );
        // 非法事件
        assert_eq!(s.transition(CaptureEvent::Stop), CaptureState::Stopped);
        assert_eq!(
            CaptureState::Running.transition(CaptureEvent::Start),
            CaptureState::Running
        );
    }

    #[test]
    fn test_failed_probe_does_not_run() {
        let source = Arc::new(MockFrameSource::failing());
        let capture = CaptureLoop::new(source.clone(), tiny_request(), fast_timing());

        assert!(matches!(capture.start(), Err(CaptureError::NotInitialized)));
        assert!(!capture.is_initialized());
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert!(!capture.frame_buffer().has_frame());
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_running_loop_publishes_frames() {
        let source = Arc::new(MockFrameSource::new());
        let capture = CaptureLoop::new(source.clone(), tiny_request(), fast_timing());

        capture.start().unwrap();
        assert!(capture.is_initialized());
        assert_eq!(capture.state(), CaptureState::Running);
        assert!(capture.frame_buffer().has_frame());

        thread::sleep(Duration::from_millis(100));
        capture.stop();
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert!(source.calls() > 2);
    }

    #[test]
    fn test_capture_failures_are_retried() {
        // 探测成功，之后前几次失败再恢复
        let source = Arc::new(MockFrameSource::with_pattern(|n| n == 1 || n > 4));
        let capture = CaptureLoop::new(source.clone(), tiny_request(), fast_timing());

        capture.start().unwrap();
        thread::sleep(Duration::from_millis(250));
        capture.stop();

        assert!(source.calls() > 5);
        let frame = capture.frame_buffer().current().unwrap();
        assert_ne!(frame.data[0], 1);
    }

    #[test]
    fn test_double_start_is_noop() {
        let source = Arc::new(MockFrameSource::new());
        let capture = CaptureLoop::new(source, tiny_request(), fast_timing());
        capture.start().unwrap();
        capture.start().unwrap();
        assert_eq!(capture.state(), CaptureState::Running);
        capture.stop();
        capture.stop();
        assert_eq!(capture.state(), CaptureState::Stopped);
    }
}
