use std::collections::HashMap;

use serde_json::Value;

use super::ExtractionError;

/// 各提取类型的必填键；未列出的类型不做校验
pub fn required_keys(extraction_type: &str) -> &'static [&'static str] {
    match extraction_type {
        "current_lap" => &["lap_number"],
        "timing_table" => &["timing_table"],
        "full_extraction" => &["lap_number", "table_type"],
        "tire_info" => &[],
        _ => &[],
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    overrides: HashMap<String, Vec<String>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖某个类型的必填键
    pub fn with_required(mut self, extraction_type: &str, keys: Vec<String>) -> Self {
        self.overrides.insert(extraction_type.to_string(), keys);
        self
    }

    pub fn keys_for(&self, extraction_type: &str) -> Vec<String> {
        match self.overrides.get(extraction_type) {
            Some(keys) => keys.clone(),
            None => required_keys(extraction_type)
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }

    /// 一次性报告全部缺失的键
    pub fn validate(&self, parsed: &Value, extraction_type: &str) -> Result<(), ExtractionError> {
        let required = self.keys_for(extraction_type);
        if required.is_empty() {
            return Ok(());
        }

        let object = parsed.as_object().ok_or(ExtractionError::NotAnObject)?;
        let missing: Vec<String> = required
            .into_iter()
            .filter(|key| !object.contains_key(key))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExtractionError::MissingKeys(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_single_key() {
        let validator = Validator::new();
        match validator.validate(&json!({}), "current_lap") {
            Err(ExtractionError::MissingKeys(keys)) => assert_eq!(keys, vec!["lap_number"]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(validator
            .validate(&json!({"lap_number": 5}), "current_lap")
            .is_ok());
    }

    #[test]
    fn test_all_missing_keys_reported() {
        let validator = Validator::new();
        let err = validator
            .validate(&json!({"other": 1}), "full_extraction")
            .unwrap_err();
        assert!(matches!(
            &err,
            ExtractionError::MissingKeys(keys) if keys == &vec!["lap_number".to_string(), "table_type".to_string()]
        ));
        assert_eq!(
            err.to_string(),
            "Missing required keys: lap_number, table_type"
        );
    }

    #[test]
    fn test_unknown_type_accepts_anything() {
        let validator = Validator::new();
        assert!(validator.validate(&json!([1, 2]), "tire_info").is_ok());
        assert!(validator.validate(&json!("x"), "weather").is_ok());
    }

    #[test]
    fn test_non_object_rejected_when_keys_required() {
        let validator = Validator::new();
        assert!(matches!(
            validator.validate(&json!([1]), "timing_table"),
            Err(ExtractionError::NotAnObject)
        ));
    }

    #[test]
    fn test_override_required_keys() {
        let validator =
            Validator::new().with_required("tire_info", vec!["compound".to_string()]);
        assert_eq!(validator.keys_for("tire_info"), vec!["compound"]);
        assert!(validator.validate(&json!({}), "tire_info").is_err());
        assert_eq!(validator.keys_for("current_lap"), vec!["lap_number"]);
    }
}
