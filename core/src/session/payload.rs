//! Request payload normalization.

use serde_json::{Map, Value};

use crate::schema::{truthy, Inputs, PromptVariable, VarType};
use crate::transport::{AttachedFile, RequestPayload};

const FILE_FIELDS: [&str; 4] = ["type", "transfer_method", "url", "upload_file_id"];

/// Build the wire payload for one send.
///
/// Absent values are dropped, boolean variables become JSON booleans and
/// file variables are reduced to their transport form. Keys not declared in
/// the schema pass through untouched.
pub fn build_payload(
    schema: &[PromptVariable],
    inputs: &Inputs,
    files: &[AttachedFile],
) -> RequestPayload {
    let mut out = Map::new();
    for (key, value) in inputs {
        let Some(value) = value.as_ref().filter(|v| !v.is_null()) else {
            continue;
        };
        let var_type = schema
            .iter()
            .find(|var| var.key == *key)
            .map(|var| var.var_type);

        let value = match var_type {
            Some(t) if t.is_boolean() => Value::Bool(truthy(value)),
            Some(VarType::File) => file_for_transport(value),
            Some(VarType::FileList) => match value {
                Value::Array(items) => Value::Array(items.iter().map(file_for_transport).collect()),
                single => Value::Array(vec![file_for_transport(single)]),
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), value);
    }

    let files = if files.is_empty() {
        None
    } else {
        Some(files.iter().map(AttachedFile::for_transport).collect())
    };

    RequestPayload { inputs: out, files }
}

fn file_for_transport(value: &Value) -> Value {
    let Value::Object(obj) = value else {
        return value.clone();
    };
    let mut reduced = Map::new();
    for field in FILE_FIELDS {
        let picked = obj.get(field).cloned().unwrap_or(Value::Null);
        let picked = match (field, picked) {
            ("url", Value::Null) => Value::String(String::new()),
            (_, v) => v,
        };
        reduced.insert(field.to_string(), picked);
    }
    Value::Object(reduced)
}
