use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 一个提取类型及其 prompt，按配置顺序执行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSpec {
    pub extraction_type: String,
    pub prompt: String,
}

impl PromptSpec {
    pub fn new(extraction_type: &str, prompt: &str) -> Self {
        Self {
            extraction_type: extraction_type.to_string(),
            prompt: prompt.to_string(),
        }
    }
}

/// 本地时间的 ISO-8601 字符串（微秒精度，无时区）
pub fn iso_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// 单张图片所有 prompt 的聚合结果，交给持久化后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub image_filename: String,
    pub timestamp: String,
    pub extractions: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
}

impl ExtractionResult {
    pub fn new(image_filename: &str, session: Option<Value>) -> Self {
        Self {
            image_filename: image_filename.to_string(),
            timestamp: iso_timestamp(),
            extractions: Map::new(),
            session,
        }
    }

    pub fn insert(&mut self, extraction_type: &str, value: Value) {
        self.extractions.insert(extraction_type.to_string(), value);
    }

    /// 第一个带 `lap_number` 的提取结果里的圈数
    pub fn lap_number(&self) -> Option<i64> {
        self.first_field("lap_number").and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn table_type(&self) -> Option<String> {
        self.first_field("table_type")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn first_field(&self, key: &str) -> Option<&Value> {
        self.extractions.values().find_map(|v| v.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifts_lap_and_table_type() {
        let mut result = ExtractionResult::new("manual_20240101_120000.jpg", None);
        result.insert("timing_table", json!({"timing_table": []}));
        result.insert(
            "full_extraction",
            json!({"lap_number": "14", "table_type": "gap"}),
        );

        assert_eq!(result.lap_number(), Some(14));
        assert_eq!(result.table_type().as_deref(), Some("gap"));
    }

    #[test]
    fn test_serialization_keeps_prompt_order() {
        let mut result = ExtractionResult::new("a.jpg", Some(json!({"session": "FP1"})));
        result.insert("timing_table", json!({"timing_table": []}));
        result.insert("current_lap", json!({"lap_number": 1}));

        let text = serde_json::to_string(&result).unwrap();
        let timing = text.find("\"timing_table\":{").unwrap();
        let lap = text.find("\"current_lap\"").unwrap();
        assert!(timing < lap);
        assert!(text.contains("\"session\":{\"session\":\"FP1\"}"));

        let back: ExtractionResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = iso_timestamp();
        assert_eq!(ts.len(), "2024-01-01T12:00:00.000000".len());
        assert_eq!(&ts[10..11], "T");
    }
}
