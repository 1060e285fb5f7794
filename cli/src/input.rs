//! Loading schema, grid, and inline inputs from the command line.

use std::path::Path;

use genbatch_core::error::CliError;
use genbatch_core::schema::{Inputs, PromptVariable, VarType};
use serde_json::Value;

pub fn load_schema(path: &str) -> Result<Vec<PromptVariable>, CliError> {
    let raw = std::fs::read_to_string(Path::new(path))?;
    serde_json::from_str(&raw)
        .map_err(|e| CliError::Config(format!("invalid schema {path}: {e}")))
}

/// Read a grid as a JSON array of rows. Non-string cells are rendered the
/// way a spreadsheet export would show them; `null` becomes an empty cell.
pub fn load_grid(path: &str) -> Result<Vec<Vec<String>>, CliError> {
    let raw = std::fs::read_to_string(Path::new(path))?;
    let rows: Vec<Vec<Value>> = serde_json::from_str(&raw)
        .map_err(|e| CliError::Config(format!("invalid grid {path}: {e}")))?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Parse `KEY=VALUE` pairs. Keys outside a non-empty schema are rejected.
pub fn parse_inputs(pairs: &[String], schema: &[PromptVariable]) -> Result<Inputs, CliError> {
    let mut inputs = Inputs::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| CliError::Command(format!("invalid input {pair:?} (expected KEY=VALUE)")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::Command(format!("invalid input {pair:?} (empty key)")));
        }
        if !schema.is_empty() && !schema.iter().any(|v| v.key == key) {
            return Err(CliError::Command(format!("unknown variable {key:?}")));
        }
        inputs.insert(key.to_string(), Some(Value::String(value.to_string())));
    }
    Ok(inputs)
}

/// Schema used by `run` when none is given: one optional string per input.
pub fn implied_schema(inputs: &Inputs) -> Vec<PromptVariable> {
    inputs
        .keys()
        .map(|key| PromptVariable::new(key.clone(), key.clone(), VarType::String))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_grid_renders_cells() {
        let file = temp(r#"[["Name","Age"],["Alice",30],["Bob",null]]"#);
        let grid = load_grid(file.path().to_str().unwrap()).unwrap();
        assert_eq!(grid[1], vec!["Alice".to_string(), "30".to_string()]);
        assert_eq!(grid[2], vec!["Bob".to_string(), String::new()]);
    }

    #[test]
    fn test_load_schema_errors_are_config_errors() {
        let file = temp("{not json");
        let err = load_schema(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.exit_code(), 11);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_grid("/nonexistent/genbatch-grid.json").unwrap_err();
        assert_eq!(err.exit_code(), 20);
    }

    #[test]
    fn test_parse_inputs() {
        let schema = vec![PromptVariable::new("q", "Question", VarType::String)];
        let inputs = parse_inputs(&["q=a=b".to_string()], &schema).unwrap();
        assert_eq!(inputs["q"], Some(json!("a=b")));

        assert!(parse_inputs(&["q".to_string()], &schema).is_err());
        assert!(parse_inputs(&["other=1".to_string()], &schema).is_err());
        assert!(parse_inputs(&["other=1".to_string()], &[]).is_ok());
    }

    #[test]
    fn test_implied_schema() {
        let inputs = parse_inputs(&["b=2".to_string(), "a=1".to_string()], &[]).unwrap();
        let schema = implied_schema(&inputs);
        let keys: Vec<&str> = schema.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(schema.iter().all(|v| !v.required));
    }
}
