use std::time::Duration;

use log::{debug, error};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;

use super::{DispatchError, EncodedImage, VisionBackend};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<&'a str>,
    format: &'a str,
    stream: bool,
}

/// 本地 Ollama `/api/generate`，非流式，回复里取 `response` 字段
pub struct OllamaBackend {
    client: Client,
    host: String,
    model: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(host: &str, model: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/generate", self.host)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl VisionBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn infer(&self, image: &EncodedImage, prompt: &str) -> Result<String, DispatchError> {
        let payload = GenerateRequest {
            model: &self.model,
            prompt,
            images: vec![&image.base64],
            format: "json",
            stream: false,
        };

        let url = self.endpoint();
        debug!("POST {} (model {})", url, self.model);

        let reply: Value = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json())
            .map_err(|e| {
                error!("❌ Ollama API request failed: {}", e);
                DispatchError::from_reqwest(e, self.timeout)
            })?;

        match reply.get("response").and_then(Value::as_str) {
            Some(text) => Ok(text.to_string()),
            None => {
                error!("❌ Invalid response from Ollama: {}", reply);
                Err(DispatchError::MalformedReply(
                    "reply has no `response` field".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let backend =
            OllamaBackend::new("http://localhost:11434/", "llava", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:11434/api/generate");
        assert_eq!(backend.model(), "llava");
        assert_eq!(backend.name(), "ollama");
    }

    #[test]
    fn test_request_payload_shape() {
        let payload = GenerateRequest {
            model: "granite3.2-vision:2b",
            prompt: "read the lap",
            images: vec!["AAAA"],
            format: "json",
            stream: false,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["images"][0], "AAAA");
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_unreachable_host_is_request_error() {
        // 端口 9 (discard) 通常无人监听
        let backend =
            OllamaBackend::new("http://127.0.0.1:9", "llava", Duration::from_secs(2)).unwrap();
        let image = EncodedImage::from_bytes(b"img", "image/jpeg");
        let err = backend.infer(&image, "prompt").unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Request(_) | DispatchError::Timeout(_)
        ));
    }
}
