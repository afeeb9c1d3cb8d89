use std::sync::{Arc, Mutex};

use super::{DispatchError, EncodedImage, VisionBackend};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub image_base64: String,
}

type Responder = Box<dyn Fn(&str, usize) -> Result<String, DispatchError> + Send + Sync>;

/// 按脚本应答的后端，用于测试和离线演示
pub struct ScriptedBackend {
    // (prompt, 第几次调用, 从 0 开始)
    responder: Responder,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedBackend {
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, usize) -> Result<String, DispatchError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::with_responder(move |_, _| Ok(reply.clone()))
    }

    /// prompt 包含某个关键字时返回对应回复，都不匹配则报请求错误
    pub fn by_prompt(table: Vec<(&str, &str)>) -> Self {
        let table: Vec<(String, String)> = table
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::with_responder(move |prompt, _| {
            table
                .iter()
                .find(|(needle, _)| prompt.contains(needle.as_str()))
                .map(|(_, reply)| reply.clone())
                .ok_or_else(|| DispatchError::Request(format!("no scripted reply for: {}", prompt)))
        })
    }

    pub fn calls_handle(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        Arc::clone(&self.calls)
    }
}

impl VisionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn infer(&self, image: &EncodedImage, prompt: &str) -> Result<String, DispatchError> {
        let index = match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(RecordedCall {
                    prompt: prompt.to_string(),
                    image_base64: image.base64.clone(),
                });
                calls.len() - 1
            }
            Err(_) => 0,
        };
        (self.responder)(prompt, index)
    }
}
