//! gst-launch 子进程抓帧
//!
//! 每次调用启动一条 `num-buffers=1` 的 GStreamer 管线，把一帧 RGB 原始数据写到临时文件，
//! 读回后校验尺寸。相机驱动的生命周期不归这里管。

use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::core::capture::frame::Frame;
use crate::core::capture::source::{CaptureRequest, FrameSource};
use crate::core::capture::CaptureError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_STEP: Duration = Duration::from_millis(20);

pub struct GstFrameSource {
    launcher: String,
    source_element: String,
    timeout: Duration,
}

impl GstFrameSource {
    pub fn new(source_element: impl Into<String>) -> Self {
        Self {
            launcher: "gst-launch-1.0".to_string(),
            source_element: source_element.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = launcher.into();
        self
    }

    /// 组装 gst-launch 参数（不含可执行文件名）
    pub fn pipeline_args(&self, request: &CaptureRequest, location: &Path) -> Vec<String> {
        let mut args = vec![self.source_element.clone(), "num-buffers=1".to_string()];

        if self.source_element == "nvarguscamerasrc" {
            // Jetson CSI 相机先走 NVMM 内存再转换
            args.extend([
                "!".to_string(),
                format!(
                    "video/x-raw(memory:NVMM),width={},height={},format=NV12,framerate={}/1",
                    request.width, request.height, request.fps
                ),
                "!".to_string(),
                "nvvidconv".to_string(),
                "!".to_string(),
                "video/x-raw,format=BGRx".to_string(),
            ]);
        }

        args.extend([
            "!".to_string(),
            "videoconvert".to_string(),
            "!".to_string(),
            "videoscale".to_string(),
            "!".to_string(),
            format!(
                "video/x-raw,format=RGB,width={},height={}",
                request.width, request.height
            ),
            "!".to_string(),
            "filesink".to_string(),
            format!("location={}", location.display()),
        ]);
        args
    }

    fn run_pipeline(&self, request: &CaptureRequest) -> Result<Frame, CaptureError> {
        // NamedTempFile drop 时顺带清理
        let raw_file = tempfile::Builder::new()
            .prefix("pitwall_frame_")
            .suffix(".raw")
            .tempfile()?;

        let mut child = Command::new(&self.launcher)
            .args(self.pipeline_args(request, raw_file.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // 边跑边读 stderr，管道写满会卡住子进程
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Timeout(self.timeout));
            }
            thread::sleep(POLL_STEP);
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(CaptureError::Command(format!(
                "{} exited with {}: {}",
                self.launcher,
                status,
                stderr.trim()
            )));
        }

        let raw = fs::read(raw_file.path())?;
        let frame = Frame::new(request.width, request.height, raw)?;
        frame.rotated(request.rotation)
    }
}

impl Default for GstFrameSource {
    fn default() -> Self {
        Self::new("nvarguscamerasrc")
    }
}

impl FrameSource for GstFrameSource {
    fn capture_frame(&self, request: &CaptureRequest) -> Option<Frame> {
        match self.run_pipeline(request) {
            Ok(frame) => {
                debug!("Captured {}x{} frame", frame.width, frame.height);
                Some(frame)
            }
            Err(e) => {
                warn!("⚠️ Frame capture failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_pipeline_args_for_csi_camera() {
        let source = GstFrameSource::default();
        let request = CaptureRequest::default();
        let args = source.pipeline_args(&request, &PathBuf::from("/tmp/f.raw"));

        assert_eq!(args[0], "nvarguscamerasrc");
        assert_eq!(args[1], "num-buffers=1");
        assert!(args
            .iter()
            .any(|a| a == "video/x-raw(memory:NVMM),width=1280,height=720,format=NV12,framerate=30/1"));
        assert!(args.iter().any(|a| a == "nvvidconv"));
        assert_eq!(args.last().unwrap(), "location=/tmp/f.raw");
    }

    #[test]
    fn test_pipeline_args_for_generic_source() {
        let source = GstFrameSource::new("v4l2src");
        let request = CaptureRequest {
            width: 640,
            height: 480,
            fps: 15,
            rotation: 0,
        };
        let args = source.pipeline_args(&request, &PathBuf::from("/tmp/f.raw"));

        assert_eq!(args[0], "v4l2src");
        assert!(!args.iter().any(|a| a == "nvvidconv"));
        assert!(args
            .iter()
            .any(|a| a == "video/x-raw,format=RGB,width=640,height=480"));
    }

    #[test]
    fn test_missing_launcher_yields_none() {
        let source = GstFrameSource::default().with_launcher("pitwall-no-such-launcher");
        assert!(source.capture_frame(&CaptureRequest::default()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_noisy_launcher_does_not_block_on_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("noisy-launch.sh");
        // 远超管道缓冲的 stderr 输出，然后失败退出
        fs::write(
            &script,
            "head -c 262144 /dev/zero | tr '\\0' x >&2\necho pipeline-broke >&2\nexit 3\n",
        )
        .unwrap();

        // sh <script> num-buffers=1 ...，管线参数被脚本忽略
        let source =
            GstFrameSource::new(script.to_string_lossy().into_owned()).with_launcher("sh");
        let started = Instant::now();
        let err = source.run_pipeline(&CaptureRequest::default()).unwrap_err();

        assert!(started.elapsed() < DEFAULT_TIMEOUT);
        match err {
            CaptureError::Command(message) => assert!(message.contains("pipeline-broke")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
