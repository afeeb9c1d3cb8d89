use serde::Serialize;
use serde_json::Value;

use super::{StoreError, StoredExtraction};

const TABLE_KEYS: [&str; 3] = ["timing_table", "timing_data", "rows"];
const DRIVER_KEYS: [&str; 4] = ["driver", "name", "code", "abbreviation"];
const POSITION_KEYS: [&str; 2] = ["position", "pos"];
const VALUE_KEYS: [&str; 5] = ["interval", "gap", "tire_age", "value", "time"];

/// 一位车手在某一圈的一条计时数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingRow {
    pub position: Option<i64>,
    pub driver: String,
    pub value: Option<String>,
    pub lap_number: Option<i64>,
    pub table_type: Option<String>,
}

/// 在聚合结果里找计时表数组并逐行展开
pub fn normalize_rows(record: &StoredExtraction) -> Result<Vec<TimingRow>, StoreError> {
    let table = find_table(&record.extractions).ok_or_else(|| StoreError::Normalize {
        id: record.id,
        reason: "no timing table in extraction".to_string(),
    })?;

    let rows: Vec<TimingRow> = table
        .iter()
        .filter_map(|entry| {
            let driver = first_of(entry, &DRIVER_KEYS).and_then(as_text)?;
            Some(TimingRow {
                position: first_of(entry, &POSITION_KEYS).and_then(as_integer),
                driver,
                value: first_of(entry, &VALUE_KEYS).and_then(as_text),
                lap_number: record.lap_number,
                table_type: record.table_type.clone(),
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(StoreError::Normalize {
            id: record.id,
            reason: "timing table has no driver rows".to_string(),
        });
    }
    Ok(rows)
}

fn find_table(extractions: &Value) -> Option<&Vec<Value>> {
    let object = extractions.as_object()?;
    object.values().find_map(|extraction| match extraction {
        Value::Array(rows) => Some(rows),
        Value::Object(fields) => TABLE_KEYS
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_array)),
        _ => None,
    })
}

fn first_of<'a>(entry: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| entry.get(*key))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().trim_start_matches('P').parse().ok(),
        _ => None,
    }
}
