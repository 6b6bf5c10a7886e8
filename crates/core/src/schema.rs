//! Argument validation against a tool's JSON Schema.
//!
//! Supports the subset tools actually declare: `type`, `required`,
//! `properties`, `additionalProperties: false`, `enum`, `minimum`,
//! `maximum` and array `items`. Unknown keywords are ignored.

use serde_json::Value;

/// Validate `value` against `schema`.
///
/// On failure returns a description of the first violated constraint,
/// prefixed with the JSON path of the offending value.
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at("$", value, schema)
}

fn validate_at(path: &str, value: &Value, schema: &Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!(
                "{path}: expected {expected}, got {}",
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(format!("{path}: must be one of {}", options.join(", ")));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{path}: must be >= {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{path}: must be <= {max}"));
            }
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    return Err(format!("{path}: missing required property '{key}'"));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

        for (key, child) in obj {
            match properties.and_then(|p| p.get(key)) {
                Some(child_schema) => {
                    validate_at(&format!("{path}.{key}"), child, child_schema)?;
                }
                None if closed => {
                    return Err(format!("{path}: unexpected property '{key}'"));
                }
                None => {}
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(&format!("{path}[{i}]"), item, item_schema)?;
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
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

    fn price_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string" },
                "currency": { "type": "string", "enum": ["usd", "eur"] },
                "since_hours": { "type": "integer", "minimum": 1, "maximum": 168 }
            },
            "required": ["symbol"]
        })
    }

    #[test]
    fn valid_arguments_pass() {
        let args = json!({"symbol": "TOKENX", "currency": "usd", "since_hours": 24});
        assert!(validate(&args, &price_schema()).is_ok());
    }

    #[test]
    fn missing_required_property() {
        let err = validate(&json!({}), &price_schema()).unwrap_err();
        assert!(err.contains("missing required property 'symbol'"), "{err}");
    }

    #[test]
    fn wrong_type_names_the_path() {
        let err = validate(&json!({"symbol": 42}), &price_schema()).unwrap_err();
        assert_eq!(err, "$.symbol: expected string, got integer");
    }

    #[test]
    fn non_object_arguments_rejected() {
        let err = validate(&json!("TOKENX"), &price_schema()).unwrap_err();
        assert!(err.contains("expected object"));
    }

    #[test]
    fn enum_violation() {
        let err = validate(&json!({"symbol": "A", "currency": "gbp"}), &price_schema()).unwrap_err();
        assert!(err.contains("must be one of"));
    }

    #[test]
    fn range_violation() {
        let err =
            validate(&json!({"symbol": "A", "since_hours": 500}), &price_schema()).unwrap_err();
        assert!(err.contains("<= 168"));
    }

    #[test]
    fn closed_object_rejects_extra_keys() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": false
        });
        assert!(validate(&json!({"a": "x"}), &schema).is_ok());
        let err = validate(&json!({"a": "x", "b": 1}), &schema).unwrap_err();
        assert!(err.contains("unexpected property 'b'"));
    }

    #[test]
    fn array_items_are_checked() {
        let schema = json!({"type": "array", "items": {"type": "number"}});
        assert!(validate(&json!([1, 2.5]), &schema).is_ok());
        let err = validate(&json!([1, "two"]), &schema).unwrap_err();
        assert!(err.starts_with("$[1]"));
    }
}
