use std::path::Path;
use std::time::{Duration, Instant};

use log::{info, warn};

use super::local::OllamaBackend;
use super::streaming::StreamingChatBackend;
use super::{DispatchError, EncodedImage, VisionBackend};

/// 后端选择，构造 worker 时读取一次，之后不再变化
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Ollama {
        host: String,
        model: String,
        timeout: Duration,
    },
    OpenAiCompatible {
        api_base: String,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
    },
}

impl BackendConfig {
    pub fn model(&self) -> &str {
        match self {
            BackendConfig::Ollama { model, .. } => model,
            BackendConfig::OpenAiCompatible { model, .. } => model,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            BackendConfig::Ollama { timeout, .. } => *timeout,
            BackendConfig::OpenAiCompatible { timeout, .. } => *timeout,
        }
    }
}

pub struct InferenceDispatcher {
    backend: Box<dyn VisionBackend>,
}

impl InferenceDispatcher {
    pub fn from_config(config: &BackendConfig) -> Result<Self, DispatchError> {
        let backend: Box<dyn VisionBackend> = match config {
            BackendConfig::Ollama {
                host,
                model,
                timeout,
            } => Box::new(OllamaBackend::new(host, model, *timeout)?),
            BackendConfig::OpenAiCompatible {
                api_base,
                model,
                api_key,
                timeout,
            } => {
                if api_key.is_none() {
                    warn!("⚠️ No API key configured for {}", api_base);
                }
                Box::new(StreamingChatBackend::new(
                    api_base,
                    model,
                    api_key.clone(),
                    *timeout,
                )?)
            }
        };

        info!(
            "🤖 Inference backend '{}' ready (model {})",
            backend.name(),
            config.model()
        );
        Ok(Self { backend })
    }

    pub fn with_backend(backend: Box<dyn VisionBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn infer(&self, image_path: &Path, prompt: &str) -> Result<String, DispatchError> {
        let image = EncodedImage::load(image_path)?;
        let started = Instant::now();
        let result = self.backend.infer(&image, prompt);
        info!(
            "Inference on {} via {} took {:.2}s",
            image_path.display(),
            self.backend.name(),
            started.elapsed().as_secs_f32()
        );
        result
    }
}
