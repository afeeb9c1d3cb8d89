//! 模型回复的清洗、解析与校验，以及每张图片的聚合结果

mod result;
mod sanitizer;
mod validator;

pub use result::{iso_timestamp, ExtractionResult, PromptSpec};
pub use sanitizer::{parse_response, sanitize};
pub use validator::{required_keys, Validator};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("response is not valid JSON after sanitizing: {message}")]
    Malformed { message: String, cleaned: String },
    #[error("Data is not a valid dictionary")]
    NotAnObject,
    #[error("Missing required keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
}
