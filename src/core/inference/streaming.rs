//! 流式 chat-completions 后端（OpenAI 兼容接口）
//!
//! 逐行读取 SSE (`data: {...}`)，把每个增量的 content 拼成一个字符串。
//! 也接受 Ollama `/api/chat` 的 NDJSON 行。

use std::io::{self, BufRead, BufReader};
use std::time::Duration;

use log::{debug, error, info};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;

use super::{DispatchError, EncodedImage, VisionBackend};

pub const JSON_ONLY_INSTRUCTION: &str =
    "Respond with valid JSON only. Do not include explanations or markdown formatting.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done,
    Skip,
}

/// 解析一行流式输出
pub fn parse_stream_line(line: &str) -> StreamEvent {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return StreamEvent::Skip;
    }

    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => line,
    };
    if payload == "[DONE]" {
        return StreamEvent::Done;
    }

    let chunk: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return StreamEvent::Skip,
    };

    let content = chunk
        .pointer("/choices/0/delta/content")
        .or_else(|| chunk.pointer("/message/content"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if !content.is_empty() {
        StreamEvent::Content(content.to_string())
    } else if chunk.get("done").and_then(Value::as_bool) == Some(true) {
        StreamEvent::Done
    } else {
        StreamEvent::Skip
    }
}

pub struct StreamingChatBackend {
    client: Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl StreamingChatBackend {
    pub fn new(
        api_base: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            timeout,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn build_request(&self, image: &EncodedImage, prompt: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            stream: true,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: format!("{}\n\n{}", prompt, JSON_ONLY_INSTRUCTION),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_url(),
                        },
                    },
                ],
            }],
        }
    }

    fn read_stream<R: BufRead>(&self, reader: R) -> Result<String, DispatchError> {
        let mut text = String::new();
        for line in reader.lines() {
            let line = line.map_err(|e| self.map_read_error(e))?;
            match parse_stream_line(&line) {
                StreamEvent::Content(chunk) => text.push_str(&chunk),
                StreamEvent::Done => break,
                StreamEvent::Skip => {}
            }
        }

        if text.trim().is_empty() {
            return Err(DispatchError::EmptyResponse);
        }
        Ok(text)
    }

    /// reqwest 读 body 超时会包成 `ErrorKind::Other` 的 io::Error，要取出内层错误判断
    fn map_read_error(&self, e: io::Error) -> DispatchError {
        let timed_out = e.kind() == io::ErrorKind::TimedOut
            || e.get_ref()
                .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                .map(reqwest::Error::is_timeout)
                .unwrap_or(false);
        if timed_out {
            error!("❌ Stream stalled past {:?}", self.timeout);
            DispatchError::Timeout(self.timeout)
        } else {
            DispatchError::Request(format!("stream read failed: {}", e))
        }
    }
}

impl VisionBackend for StreamingChatBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn infer(&self, image: &EncodedImage, prompt: &str) -> Result<String, DispatchError> {
        let url = self.endpoint();
        debug!("POST {} (model {}, streaming)", url, self.model);

        let mut request = self.client.post(&url).json(&self.build_request(image, prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| {
                error!("❌ Chat completion request failed: {}", e);
                DispatchError::from_reqwest(e, self.timeout)
            })?;

        let text = self.read_stream(BufReader::new(response))?;
        info!("✅ Streamed {} chars from {}", text.len(), self.model);
        Ok(text)
    }
}
