//! 视觉模型推理分发
//!
//! 同一时间只有一个后端生效（本地 Ollama 或流式云端 chat-completions），
//! 调用方只看到 `infer(image, prompt) -> String` 和统一的错误词汇。

mod dispatcher;
mod local;
mod scripted;
mod streaming;

pub use dispatcher::{BackendConfig, InferenceDispatcher};
pub use local::OllamaBackend;
pub use scripted::{RecordedCall, ScriptedBackend};
pub use streaming::{parse_stream_line, StreamEvent, StreamingChatBackend, JSON_ONLY_INSTRUCTION};

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(String),
    #[error("malformed reply: {0}")]
    MalformedReply(String),
    #[error("backend returned an empty response")]
    EmptyResponse,
    #[error("cannot read image {path}: {source}")]
    ImageUnreadable { path: PathBuf, source: io::Error },
}

impl DispatchError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout(timeout)
        } else if err.is_decode() {
            DispatchError::MalformedReply(err.to_string())
        } else {
            DispatchError::Request(err.to_string())
        }
    }
}

/// base64 编码后的图片
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub base64: String,
    pub mime: &'static str,
}

impl EncodedImage {
    pub fn load(path: &Path) -> Result<Self, DispatchError> {
        let bytes = std::fs::read(path).map_err(|source| DispatchError::ImageUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_bytes(&bytes, mime_for(path)))
    }

    pub fn from_bytes(bytes: &[u8], mime: &'static str) -> Self {
        Self {
            base64: STANDARD.encode(bytes),
            mime,
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// 后端变体的统一接口
pub trait VisionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn infer(&self, image: &EncodedImage, prompt: &str) -> Result<String, DispatchError>;
}
