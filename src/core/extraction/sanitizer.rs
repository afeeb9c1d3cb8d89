use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::ExtractionError;

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern is valid"));

/// 清洗模型回复：去掉首尾 ``` 围栏，再删掉右括号前的多余逗号
pub fn sanitize(raw: &str) -> String {
    let unfenced = strip_code_fence(raw);
    TRAILING_COMMA.replace_all(&unfenced, "$1").into_owned()
}

/// 清洗后按 JSON 解析
pub fn parse_response(raw: &str) -> Result<Value, ExtractionError> {
    let cleaned = sanitize(raw);
    serde_json::from_str(&cleaned).map_err(|e| ExtractionError::Malformed {
        message: e.to_string(),
        cleaned,
    })
}

fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() >= 2 {
        let last = lines.len() - 1;
        if is_opening_fence(lines[0]) && lines[last].trim() == "```" {
            return lines[1..last].join("\n");
        }
    }
    trimmed.to_string()
}

// ``` 或 ```json 之类，后面只能跟语言标记
fn is_opening_fence(line: &str) -> bool {
    line.trim()
        .strip_prefix("```")
        .map(|tag| {
            tag.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
        .unwrap_or(false)
}
