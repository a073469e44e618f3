// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversions between wire parameters/rows and SQLite values.

use std::ffi::c_int;

use forkdb_core::{Column, ColumnType, EngineError, InputType, Parameter, SqlType};
use rusqlite::ffi;
use rusqlite::types::{Value, ValueRef};

/// Converts a bound parameter into the SQLite value its `sql_type` asks for.
pub fn parameter_value(param: &Parameter) -> Result<Value, EngineError> {
    if param.input_type == InputType::Null || param.sql_type == SqlType::Null {
        return Ok(Value::Null);
    }
    let bad = |what: &str| {
        EngineError::failed(format!(
            "parameter {}: cannot bind {} input as {}: {what}",
            param.index, param.input_type, param.sql_type
        ))
    };
    match param.input_type {
        InputType::Null => Ok(Value::Null),
        InputType::Char => {
            let text = std::str::from_utf8(&param.data).map_err(|_| bad("invalid UTF-8"))?;
            match param.sql_type {
                SqlType::Varchar => Ok(Value::Text(text.to_string())),
                SqlType::Integer => text
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| bad("not an integer")),
                SqlType::Double => text
                    .trim()
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| bad("not a number")),
                SqlType::Varbinary => Ok(Value::Blob(param.data.clone())),
                SqlType::Null => Ok(Value::Null),
            }
        }
        InputType::Integer => {
            let v = i64::from_le_bytes(eight_bytes(&param.data).ok_or_else(|| bad("expected 8 bytes"))?);
            match param.sql_type {
                SqlType::Varchar => Ok(Value::Text(v.to_string())),
                SqlType::Integer => Ok(Value::Integer(v)),
                SqlType::Double => Ok(Value::Real(v as f64)),
                SqlType::Varbinary => Ok(Value::Blob(param.data.clone())),
                SqlType::Null => Ok(Value::Null),
            }
        }
        InputType::Double => {
            let v = f64::from_le_bytes(eight_bytes(&param.data).ok_or_else(|| bad("expected 8 bytes"))?);
            match param.sql_type {
                SqlType::Varchar => Ok(Value::Text(v.to_string())),
                SqlType::Integer => Ok(Value::Integer(v as i64)),
                SqlType::Double => Ok(Value::Real(v)),
                SqlType::Varbinary => Ok(Value::Blob(param.data.clone())),
                SqlType::Null => Ok(Value::Null),
            }
        }
        InputType::Binary => match param.sql_type {
            SqlType::Varbinary => Ok(Value::Blob(param.data.clone())),
            SqlType::Varchar => std::str::from_utf8(&param.data)
                .map(|s| Value::Text(s.to_string()))
                .map_err(|_| bad("invalid UTF-8")),
            SqlType::Integer | SqlType::Double => Err(bad("binary data has no numeric form")),
            SqlType::Null => Ok(Value::Null),
        },
    }
}

fn eight_bytes(data: &[u8]) -> Option<[u8; 8]> {
    data.try_into().ok()
}

/// Builds the wire column for one SQLite value.
pub fn value_column(name: &str, value: ValueRef<'_>) -> rusqlite::Result<Column> {
    let column = match value {
        ValueRef::Null => Column::null(name),
        ValueRef::Integer(v) => Column::new(name, ColumnType::Int64, 1, v.to_le_bytes().to_vec()),
        ValueRef::Real(v) => Column::new(name, ColumnType::Float64, 1, v.to_le_bytes().to_vec()),
        ValueRef::Text(t) => {
            Column::new(name, ColumnType::Char, element_count(name, t.len())?, t.to_vec())
        }
        ValueRef::Blob(b) => {
            Column::new(name, ColumnType::Byte, element_count(name, b.len())?, b.to_vec())
        }
    };
    Ok(column)
}

/// Element count of a variable-length column; the wire carries it as an i32.
fn element_count(name: &str, len: usize) -> rusqlite::Result<i32> {
    i32::try_from(len)
        .map_err(|_| too_big(format!("column {name}: {len} bytes do not fit a row")))
}

/// Length argument for binding `len` bytes.
pub fn bind_length(index: usize, len: usize) -> rusqlite::Result<c_int> {
    c_int::try_from(len)
        .map_err(|_| too_big(format!("parameter {index}: {len} bytes cannot be bound")))
}

fn too_big(message: String) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_TOOBIG), Some(message))
}

/// Text form of a pragma result; `None` for NULL.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Text(s) => Some(s.clone()),
        Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}
