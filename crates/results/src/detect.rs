//! Payload classification, schema probing, and deterministic previews.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::ResultMetadata;

/// Shape of a stored payload, detected at store time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    JsonArray,
    JsonObject,
    Csv,
    Text,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::JsonArray => "json_array",
            DataType::JsonObject => "json_object",
            DataType::Csv => "csv",
            DataType::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "json_array" => DataType::JsonArray,
            "json_object" => DataType::JsonObject,
            "csv" => DataType::Csv,
            _ => DataType::Text,
        }
    }
}

/// Sample this many elements when deriving array column types.
const SCHEMA_SAMPLE: usize = 20;
/// Elements shown from each end of a sequence preview.
const PREVIEW_EDGE: usize = 5;
/// Cap on a single previewed element's serialized size.
const PREVIEW_ELEMENT_CAP: usize = 200;
/// Cap on previewed text head.
const TEXT_HEAD_CHARS: usize = 256;
/// Cap on object key inventories.
const KEY_INVENTORY_CAP: usize = 50;

/// Classify a payload. JSON wins over CSV; CSV requires either a CSV
/// content type or a consistent delimited shape in the first lines.
pub fn detect_data_type(bytes: &[u8], content_type: &str) -> DataType {
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => return DataType::Text,
    };
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return match value {
                Value::Array(_) => DataType::JsonArray,
                Value::Object(_) => DataType::JsonObject,
                _ => DataType::Text,
            };
        }
    }
    if content_type.contains("csv") || looks_like_csv(text) {
        return DataType::Csv;
    }
    DataType::Text
}

fn looks_like_csv(text: &str) -> bool {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let (Some(first), Some(second)) = (lines.next(), lines.next()) else {
        return false;
    };
    let commas = first.matches(',').count();
    commas > 0 && second.matches(',').count() == commas
}

/// Build the metadata probe response for a payload.
pub fn build_metadata(
    reference_id: &str,
    bytes: &[u8],
    content_type: &str,
    data_type: DataType,
) -> ResultMetadata {
    let (schema_info, preview, retrieval_hints) = match data_type {
        DataType::JsonArray => array_metadata(bytes),
        DataType::JsonObject => object_metadata(bytes),
        DataType::Csv => csv_metadata(bytes),
        DataType::Text => text_metadata(bytes),
    };
    ResultMetadata {
        reference_id: reference_id.to_owned(),
        data_type,
        content_type: content_type.to_owned(),
        size_bytes: bytes.len(),
        schema_info,
        preview,
        retrieval_hints,
    }
}

fn array_metadata(bytes: &[u8]) -> (Value, Value, Vec<String>) {
    let elements: Vec<Value> = serde_json::from_slice(bytes).unwrap_or_default();
    let length = elements.len();

    // Union of keys → type names across a bounded sample.
    let mut columns = serde_json::Map::new();
    let mut all_objects = true;
    for element in elements.iter().take(SCHEMA_SAMPLE) {
        match element {
            Value::Object(map) => {
                for (key, value) in map {
                    columns
                        .entry(key.clone())
                        .or_insert_with(|| json!(type_name(value)));
                }
            }
            _ => all_objects = false,
        }
    }
    let element_type = if length == 0 {
        "empty"
    } else if all_objects {
        "object"
    } else if columns.is_empty() {
        "scalar"
    } else {
        "mixed"
    };

    let schema = json!({
        "type": "array",
        "length": length,
        "element_type": element_type,
        "columns": columns,
    });

    let preview = sequence_preview(&elements);
    let hints = vec![
        "query_tool_result with read-only SQL over the synthetic table 'results' \
         (columns from schema_info.columns), e.g. SELECT ... FROM results LIMIT 10"
            .to_owned(),
        "query_tool_result with offset/limit pagination for raw elements".to_owned(),
    ];
    (schema, preview, hints)
}

fn object_metadata(bytes: &[u8]) -> (Value, Value, Vec<String>) {
    let object: serde_json::Map<String, Value> = serde_json::from_slice(bytes).unwrap_or_default();
    let mut keys = serde_json::Map::new();
    for (key, value) in object.iter().take(KEY_INVENTORY_CAP) {
        keys.insert(key.clone(), json!(type_name(value)));
    }
    let schema = json!({
        "type": "object",
        "key_count": object.len(),
        "keys": keys,
    });
    // The preview for objects is the key inventory itself.
    let preview = json!({ "keys": object.keys().take(KEY_INVENTORY_CAP).collect::<Vec<_>>() });
    let hints = vec![
        "json_object payloads cannot be fetched wholesale".to_owned(),
        "inspect schema_info.keys and re-issue the producing tool with a narrower request"
            .to_owned(),
    ];
    (schema, preview, hints)
}

fn csv_metadata(bytes: &[u8]) -> (Value, Value, Vec<String>) {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()
        .map(|h| h.iter().map(str::to_owned).collect())
        .unwrap_or_default();
    let records: Vec<Value> = reader
        .records()
        .filter_map(|r| r.ok())
        .map(|record| {
            let mut row = serde_json::Map::new();
            for (header, field) in headers.iter().zip(record.iter()) {
                row.insert(header.clone(), json!(field));
            }
            Value::Object(row)
        })
        .collect();

    let schema = json!({
        "type": "csv",
        "headers": headers,
        "row_count": records.len(),
    });
    let preview = sequence_preview(&records);
    let hints = vec![
        "query_tool_result with read-only SQL over the synthetic table 'results' \
         (columns from schema_info.headers)"
            .to_owned(),
        "query_tool_result with offset/limit pagination for raw rows".to_owned(),
    ];
    (schema, preview, hints)
}

fn text_metadata(bytes: &[u8]) -> (Value, Value, Vec<String>) {
    let text = String::from_utf8_lossy(bytes);
    let schema = json!({
        "type": "text",
        "bytes": bytes.len(),
        "lines": text.lines().count(),
    });
    let head: String = text.chars().take(TEXT_HEAD_CHARS).collect();
    let truncated = text.chars().count() > TEXT_HEAD_CHARS;
    let preview = json!({ "head": head, "truncated": truncated });
    let hints =
        vec!["query_tool_result with offset/limit pagination to read further chunks".to_owned()];
    (schema, preview, hints)
}

/// First five and last five elements, each capped in serialized size.
fn sequence_preview(elements: &[Value]) -> Value {
    if elements.len() <= PREVIEW_EDGE * 2 {
        return json!({
            "first": elements.iter().map(bounded).collect::<Vec<_>>(),
            "last": Vec::<Value>::new(),
        });
    }
    let first: Vec<Value> = elements.iter().take(PREVIEW_EDGE).map(bounded).collect();
    let last: Vec<Value> = elements[elements.len() - PREVIEW_EDGE..]
        .iter()
        .map(bounded)
        .collect();
    json!({ "first": first, "last": last })
}

fn bounded(value: &Value) -> Value {
    let serialized = value.to_string();
    if serialized.len() <= PREVIEW_ELEMENT_CAP {
        value.clone()
    } else {
        let cut: String = serialized.chars().take(PREVIEW_ELEMENT_CAP).collect();
        Value::String(format!("{cut}…"))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_json_shapes() {
        assert_eq!(
            detect_data_type(br#"[1, 2, 3]"#, "application/json"),
            DataType::JsonArray
        );
        assert_eq!(
            detect_data_type(br#"{"a": 1}"#, "application/json"),
            DataType::JsonObject
        );
    }

    #[test]
    fn detects_csv_by_shape_and_content_type() {
        assert_eq!(
            detect_data_type(b"name,score\nalice,90\nbob,85\n", "text/plain"),
            DataType::Csv
        );
        assert_eq!(detect_data_type(b"col\nplain", "text/csv"), DataType::Csv);
    }

    #[test]
    fn falls_back_to_text() {
        assert_eq!(
            detect_data_type(b"just some prose, with a comma", "text/plain"),
            DataType::Text
        );
        assert_eq!(detect_data_type(b"not json {", "application/json"), DataType::Text);
    }

    #[test]
    fn array_preview_is_five_plus_five() {
        let elements: Vec<Value> = (0..100).map(|i| json!({"n": i})).collect();
        let bytes = serde_json::to_vec(&elements).unwrap();
        let meta = build_metadata("r1", &bytes, "application/json", DataType::JsonArray);

        let first = meta.preview["first"].as_array().unwrap();
        let last = meta.preview["last"].as_array().unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(last.len(), 5);
        assert_eq!(first[0]["n"], 0);
        assert_eq!(last[4]["n"], 99);
        assert_eq!(meta.schema_info["length"], 100);
        assert_eq!(meta.schema_info["columns"]["n"], "number");
    }

    #[test]
    fn short_array_previews_everything_once() {
        let bytes = serde_json::to_vec(&json!([1, 2, 3])).unwrap();
        let meta = build_metadata("r1", &bytes, "application/json", DataType::JsonArray);
        assert_eq!(meta.preview["first"].as_array().unwrap().len(), 3);
        assert!(meta.preview["last"].as_array().unwrap().is_empty());
    }

    #[test]
    fn metadata_size_contract_holds() {
        // 1000-element array, comfortably over 10 KB.
        let elements: Vec<Value> = (0..1000)
            .map(|i| json!({"name": format!("user-{i}"), "score": i % 100}))
            .collect();
        let bytes = serde_json::to_vec(&elements).unwrap();
        assert!(bytes.len() >= 10_240);

        let meta = build_metadata("r1", &bytes, "application/json", DataType::JsonArray);
        let serialized = serde_json::to_vec(&meta).unwrap();
        assert!(
            serialized.len() <= bytes.len() / 10,
            "metadata {} bytes exceeds payload/10 ({})",
            serialized.len(),
            bytes.len() / 10
        );
    }

    #[test]
    fn text_metadata_size_contract_holds() {
        let text = "lorem ipsum dolor sit amet ".repeat(500);
        let bytes = text.as_bytes();
        assert!(bytes.len() >= 10_240);
        let meta = build_metadata("r1", bytes, "text/plain", DataType::Text);
        let serialized = serde_json::to_vec(&meta).unwrap();
        assert!(serialized.len() <= bytes.len() / 10);
        assert_eq!(meta.preview["truncated"], true);
    }

    #[test]
    fn object_metadata_inventories_keys() {
        let bytes = serde_json::to_vec(&json!({"alpha": 1, "beta": "x", "gamma": [1]})).unwrap();
        let meta = build_metadata("r1", &bytes, "application/json", DataType::JsonObject);
        assert_eq!(meta.schema_info["key_count"], 3);
        assert_eq!(meta.schema_info["keys"]["beta"], "string");
        assert!(meta.retrieval_hints[0].contains("cannot be fetched wholesale"));
    }

    #[test]
    fn oversized_elements_are_bounded_in_preview() {
        let big = "x".repeat(5_000);
        let elements: Vec<Value> = (0..20).map(|_| json!({"blob": big})).collect();
        let bytes = serde_json::to_vec(&elements).unwrap();
        let meta = build_metadata("r1", &bytes, "application/json", DataType::JsonArray);
        let first = meta.preview["first"].as_array().unwrap();
        let rendered = first[0].to_string();
        assert!(rendered.len() < 300);
    }
}
