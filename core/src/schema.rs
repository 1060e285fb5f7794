//! Prompt-variable schema and input maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a prompt variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VarType {
    #[default]
    String,
    Paragraph,
    Number,
    Select,
    Boolean,
    Checkbox,
    File,
    FileList,
    #[serde(other)]
    Other,
}

impl VarType {
    /// Free-text variables; a blank cell means "" rather than absent.
    pub fn is_text(self) -> bool {
        matches!(self, VarType::String | VarType::Paragraph)
    }

    /// Boolean-ish variables are never "missing": unchecked is a value.
    pub fn is_boolean(self) -> bool {
        matches!(self, VarType::Boolean | VarType::Checkbox)
    }

    pub fn is_file(self) -> bool {
        matches!(self, VarType::File | VarType::FileList)
    }
}

/// One entry of the ordered variable schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVariable {
    pub key: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VarType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl PromptVariable {
    pub fn new(key: impl Into<String>, name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            var_type,
            required: false,
            max_length: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }
}

/// Variable key to value; `None` is an undefined (absent) value.
pub type Inputs = BTreeMap<String, Option<Value>>;

/// True when a value counts as empty for required-variable checks.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// First required, non-boolean variable whose input is blank, in schema order.
pub fn first_missing_required<'a>(
    schema: &'a [PromptVariable],
    inputs: &Inputs,
) -> Option<&'a PromptVariable> {
    schema.iter().find(|var| {
        var.required
            && !var.var_type.is_boolean()
            && is_blank(inputs.get(&var.key).and_then(Option::as_ref))
    })
}

/// Loose truthiness used when coercing boolean variables.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty()
                || s.eq_ignore_ascii_case("false")
                || s == "0"
                || s.eq_ignore_ascii_case("no")
                || s.eq_ignore_ascii_case("off"))
        }
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Render an input value as an export cell; absent values become "".
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_from_json() {
        let schema: Vec<PromptVariable> = serde_json::from_value(json!([
            {"key": "name", "name": "Name", "type": "string", "required": true},
            {"key": "docs", "name": "Docs", "type": "file-list"},
            {"key": "mood", "name": "Mood", "type": "external_data_tool"}
        ]))
        .unwrap();
        assert_eq!(schema[0].var_type, VarType::String);
        assert!(schema[0].required);
        assert_eq!(schema[1].var_type, VarType::FileList);
        assert_eq!(schema[2].var_type, VarType::Other);
        assert_eq!(schema[2].max_length, None);
    }

    #[test]
    fn test_first_missing_required_skips_booleans() {
        let schema = vec![
            PromptVariable::new("flag", "Flag", VarType::Boolean).required(),
            PromptVariable::new("check", "Check", VarType::Checkbox).required(),
            PromptVariable::new("first", "First", VarType::String).required(),
            PromptVariable::new("second", "Second", VarType::String).required(),
        ];
        let mut inputs = Inputs::new();
        inputs.insert("second".into(), Some(json!("value")));
        inputs.insert("first".into(), Some(json!("   ")));

        let missing = first_missing_required(&schema, &inputs).unwrap();
        assert_eq!(missing.name, "First");
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(&json!("true")));
        assert!(truthy(&json!("yes")));
        assert!(!truthy(&json!("false")));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!(1)));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(None), "");
        assert_eq!(display_value(Some(&json!("x"))), "x");
        assert_eq!(display_value(Some(&json!(true))), "true");
    }
}
