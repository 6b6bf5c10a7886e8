//! Caller-declared output shapes.
//!
//! A request names the fields it wants back (`items`). The same declaration
//! becomes an instruction appended to the user prompt, the shape description
//! given to the formatter, and the validator for the formatter's output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::type_name;

/// Scalar or nested type of one output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    #[serde(alias = "float")]
    Number,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "bool")]
    Boolean,
    Object,
}

impl DataType {
    fn label(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }
}

/// One field of the requested output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputItem {
    pub key: String,

    #[serde(alias = "data_type")]
    pub data_type: DataType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, alias = "is_array")]
    pub is_array: bool,

    /// Fields of an `object` item
    #[serde(default, alias = "sub_items", skip_serializing_if = "Vec::is_empty")]
    pub sub_items: Vec<OutputItem>,
}

impl OutputItem {
    pub fn new(key: impl Into<String>, data_type: DataType) -> Self {
        Self {
            key: key.into(),
            data_type,
            description: None,
            is_array: false,
            sub_items: Vec::new(),
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn with_sub_items(mut self, sub_items: Vec<OutputItem>) -> Self {
        self.sub_items = sub_items;
        self
    }
}

/// The first place where a value departs from the declared shape.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct ShapeViolation {
    pub path: String,
    pub message: String,
}

/// The full declared output: an object with the given fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputShape {
    pub items: Vec<OutputItem>,
}

impl OutputShape {
    pub fn new(items: Vec<OutputItem>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Natural-language instruction appended to the user prompt.
    pub fn instruction(&self) -> String {
        if self.items.is_empty() {
            return String::new();
        }
        let mut out = String::from(
            "Your final answer must provide a value for each of these fields:\n",
        );
        write_instruction(&mut out, &self.items, 0);
        out
    }

    /// JSON skeleton with type annotations, handed to the formatter.
    pub fn describe(&self) -> String {
        describe_object(&self.items, 0)
    }

    /// Check a value against the shape. `null` is accepted for any field;
    /// unknown extra fields are ignored.
    pub fn validate(&self, value: &Value) -> Result<(), ShapeViolation> {
        validate_object("$", &self.items, value)
    }
}

fn write_instruction(out: &mut String, items: &[OutputItem], depth: usize) {
    let pad = "  ".repeat(depth);
    for item in items {
        let kind = if item.is_array {
            format!("list of {}", item.data_type.label())
        } else {
            item.data_type.label().to_string()
        };
        out.push_str(&format!("{pad}- {} ({kind})", item.key));
        if let Some(desc) = &item.description {
            out.push_str(&format!(": {desc}"));
        }
        out.push('\n');
        if item.data_type == DataType::Object {
            write_instruction(out, &item.sub_items, depth + 1);
        }
    }
}

fn describe_object(items: &[OutputItem], depth: usize) -> String {
    if items.is_empty() {
        return "{}".into();
    }
    let pad = "  ".repeat(depth + 1);
    let last = items.len() - 1;
    let mut out = String::from("{\n");
    for (i, item) in items.iter().enumerate() {
        let mut repr = match item.data_type {
            DataType::Object => describe_object(&item.sub_items, depth + 1),
            other => other.label().to_string(),
        };
        if item.is_array {
            repr = format!("[{repr}]");
        }
        let comma = if i == last { "" } else { "," };
        out.push_str(&format!("{pad}\"{}\": {repr}{comma}", item.key));
        if let Some(desc) = &item.description {
            out.push_str(&format!(" // {desc}"));
        }
        out.push('\n');
    }
    out.push_str(&"  ".repeat(depth));
    out.push('}');
    out
}

fn violation(path: &str, message: impl Into<String>) -> ShapeViolation {
    ShapeViolation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn validate_object(path: &str, items: &[OutputItem], value: &Value) -> Result<(), ShapeViolation> {
    let Some(obj) = value.as_object() else {
        return Err(violation(
            path,
            format!("expected object, got {}", type_name(value)),
        ));
    };

    for item in items {
        let child_path = format!("{path}.{}", item.key);
        let Some(child) = obj.get(&item.key) else {
            return Err(violation(&child_path, "missing field"));
        };
        if child.is_null() {
            continue;
        }
        if item.is_array {
            let Some(elements) = child.as_array() else {
                return Err(violation(
                    &child_path,
                    format!("expected array, got {}", type_name(child)),
                ));
            };
            for (i, element) in elements.iter().enumerate() {
                validate_scalar(&format!("{child_path}[{i}]"), item, element)?;
            }
        } else {
            validate_scalar(&child_path, item, child)?;
        }
    }
    Ok(())
}

fn validate_scalar(path: &str, item: &OutputItem, value: &Value) -> Result<(), ShapeViolation> {
    let ok = match item.data_type {
        DataType::String => value.is_string(),
        DataType::Number => value.is_number(),
        DataType::Integer => value.as_f64().is_some_and(|n| n.fract() == 0.0),
        DataType::Boolean => value.is_boolean(),
        DataType::Object => return validate_object(path, &item.sub_items, value),
    };
    if ok || value.is_null() {
        Ok(())
    } else {
        Err(violation(
            path,
            format!(
                "expected {}, got {}",
                item.data_type.label(),
                type_name(value)
            ),
        ))
    }
}

/// A caller request as it arrives from the outer layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub query: String,

    #[serde(default)]
    pub items: Vec<OutputItem>,

    /// Continue an existing thread; a new one is created when absent.
    #[serde(default, alias = "thread_id", skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl AskRequest {
    pub fn new(query: impl Into<String>, items: Vec<OutputItem>) -> Self {
        Self {
            query: query.into(),
            items,
            thread_id: None,
        }
    }

    pub fn shape(&self) -> OutputShape {
        OutputShape::new(self.items.clone())
    }
}
