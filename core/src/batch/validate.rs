use serde_json::Value;

use crate::error::BatchError;
use crate::schema::{Inputs, PromptVariable, VarType};

fn is_empty_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// Check a tabular grid against the variable schema and build one input map
/// per retained data row.
///
/// Row 0 is the header. Trailing empty rows are dropped; an empty row with
/// data after it is rejected. Rows shorter than the header read as blank.
pub fn validate_grid(
    grid: &[Vec<String>],
    schema: &[PromptVariable],
) -> Result<Vec<Inputs>, BatchError> {
    let Some((header, data)) = grid.split_first() else {
        return Err(BatchError::EmptyGrid);
    };

    let header_matches = header.len() == schema.len()
        && header.iter().zip(schema).all(|(cell, var)| *cell == var.name);
    if !header_matches {
        return Err(BatchError::HeaderMismatch {
            expected: schema
                .iter()
                .map(|var| var.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            found: header.join(", "),
        });
    }

    let retained = data
        .iter()
        .rposition(|row| !is_empty_row(row))
        .map(|last| &data[..=last])
        .unwrap_or_default();
    if retained.is_empty() {
        return Err(BatchError::NoDataRows);
    }
    if let Some(pos) = retained.iter().position(|row| is_empty_row(row)) {
        return Err(BatchError::EmptyRow { row: pos + 2 });
    }

    let mut rows = Vec::with_capacity(retained.len());
    for (idx, row) in retained.iter().enumerate() {
        let row_no = idx + 2;
        let mut inputs = Inputs::new();
        for (col, var) in schema.iter().enumerate() {
            let cell = row.get(col).map(String::as_str).unwrap_or("");

            if var.var_type == VarType::String {
                if let Some(max_length) = var.max_length {
                    if cell.chars().count() > max_length {
                        return Err(BatchError::TooLong {
                            row: row_no,
                            name: var.name.clone(),
                            max_length,
                        });
                    }
                }
            }

            let blank = cell.trim().is_empty();
            if var.required && !var.var_type.is_boolean() && blank {
                return Err(BatchError::Required {
                    row: row_no,
                    name: var.name.clone(),
                });
            }

            let value = if !cell.is_empty() {
                Some(Value::String(cell.to_string()))
            } else if var.var_type.is_text() {
                Some(Value::String(String::new()))
            } else {
                None
            };
            inputs.insert(var.key.clone(), value);
        }
        rows.push(inputs);
    }
    Ok(rows)
}
