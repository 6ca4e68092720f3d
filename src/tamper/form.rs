// src/tamper/form.rs - configuration form description and validation
use crate::builtins::HELPER_NAMES;
use crate::tamper::snippet;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Values submitted from the configuration form, keyed by element name.
pub type FormValues = serde_json::Map<String, JsonValue>;

pub const CODE_FIELD: &str = "code";

/// Delimiters of embedded-code markup. A body wrapped in them would be
/// wrapped twice.
pub const FORBIDDEN_DELIMITERS: &[&str] = &["<?php", "?>"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigForm {
    pub elements: Vec<FormElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormElement {
    Textarea {
        name: String,
        title: String,
        description: String,
        default_value: String,
        rows: u32,
        required: bool,
    },
    /// Collapsible read-only panel
    Details {
        name: String,
        title: String,
        open: bool,
        examples: Vec<FormExample>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormExample {
    pub label: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn code(message: impl Into<String>) -> Self {
        FieldError {
            field: CODE_FIELD.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ConfigForm {
    pub fn find(&self, name: &str) -> Option<&FormElement> {
        self.elements.iter().find(|element| element.name() == name)
    }
}

impl FormElement {
    pub fn name(&self) -> &str {
        match self {
            FormElement::Textarea { name, .. } | FormElement::Details { name, .. } => name,
        }
    }
}

pub(crate) fn build(current_code: &str) -> ConfigForm {
    let examples = [
        ("Convert to uppercase", "return value.upper()"),
        ("Trim whitespace", "return value.strip()"),
        ("Use other field data", r#"return record["title"] + " - " + value"#),
        ("Conditional logic", r#"return "Default" if is_empty(value) else value"#),
    ];

    ConfigForm {
        elements: vec![
            FormElement::Textarea {
                name: CODE_FIELD.to_string(),
                title: "Starlark code".to_string(),
                description: format!(
                    "Body of a function called once per value. Use `value` for the current \
                     field value and `record` for all fields of the item. Must return a value. \
                     Helpers: {}. Example: return value.upper()",
                    HELPER_NAMES.join(", ")
                ),
                default_value: current_code.to_string(),
                rows: 10,
                required: true,
            },
            FormElement::Details {
                name: "help".to_string(),
                title: "Usage examples".to_string(),
                open: false,
                examples: examples
                    .iter()
                    .map(|(label, code)| FormExample {
                        label: label.to_string(),
                        code: code.to_string(),
                    })
                    .collect(),
            },
        ],
    }
}

/// Submitted `code` as text, if present and a string.
pub(crate) fn submitted_code(values: &FormValues) -> Option<&str> {
    values.get(CODE_FIELD).and_then(JsonValue::as_str)
}

pub(crate) fn validate(values: &FormValues) -> Vec<FieldError> {
    let code = match submitted_code(values) {
        Some(code) if !code.is_empty() => code,
        _ => return vec![FieldError::code("Code is required.")],
    };

    let mut errors = Vec::new();

    if FORBIDDEN_DELIMITERS.iter().any(|delim| code.contains(delim)) {
        errors.push(FieldError::code(
            "Do not include <?php or ?> tags, enter only the function body.",
        ));
    }

    if let Err(err) = snippet::check(code) {
        errors.push(FieldError::code(format!("Invalid code: {}", err)));
    }

    errors
}
