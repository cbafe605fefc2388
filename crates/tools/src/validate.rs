//! Structural input validation against a tool's JSON schema.
//!
//! Covers the subset the registry's schemas actually use: object type,
//! required properties, and primitive property types. Tools needing
//! richer validation do it inside `execute`.

use serde_json::Value;

use strand_domain::error::{Error, Result};

pub fn validate_input(schema: &Value, args: &Value) -> Result<()> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(Error::InvalidInput(format!(
            "expected an object argument, got {}",
            json_type(args)
        )));
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if args.get(key).is_none() {
                return Err(Error::InvalidInput(format!(
                    "missing required property {key:?}"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, property_schema) in properties {
            let Some(value) = args.get(key) else { continue };
            let Some(expected) = property_schema.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(Error::InvalidInput(format!(
                    "property {key:?} expected {expected}, got {}",
                    json_type(value)
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
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
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    #[test]
    fn accepts_valid_input() {
        validate_input(&schema(), &json!({"query": "x", "limit": 5})).unwrap();
        // Optional property may be absent.
        validate_input(&schema(), &json!({"query": "x"})).unwrap();
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate_input(&schema(), &json!({"limit": 5}));
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(validate_input(&schema(), &json!({"query": 42})).is_err());
        assert!(validate_input(&schema(), &json!({"query": "x", "limit": "ten"})).is_err());
        assert!(validate_input(&schema(), &json!("not an object")).is_err());
    }

    #[test]
    fn unconstrained_schema_accepts_anything() {
        validate_input(&json!({}), &json!({"whatever": true})).unwrap();
    }
}
