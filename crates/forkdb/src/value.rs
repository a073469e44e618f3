// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed values decoded from result rows, and bound as parameters.

use forkdb_core::{Column, ColumnType, ForkDbError, Parameter, ResultSet};
use serde::Serialize;

/// A single column value.
///
/// Numeric columns holding more than one element decode to [`Value::List`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// The positional parameter binding this value at `index`.
    pub fn to_parameter(&self, index: i32) -> Result<Parameter, ForkDbError> {
        Ok(match self {
            Value::Null => Parameter::null(index),
            Value::Integer(v) => Parameter::integer(index, *v),
            Value::Real(v) => Parameter::double(index, *v),
            Value::Text(s) => Parameter::text(index, s),
            Value::Blob(b) => Parameter::binary(index, b),
            Value::List(_) => {
                return Err(ForkDbError::Engine {
                    message: format!("parameter {index}: lists cannot be bound"),
                });
            }
        })
    }

    /// Decodes one column of a row.
    pub fn from_column(column: &Column) -> Result<Self, ForkDbError> {
        let ty = column.column_type().ok_or_else(|| {
            ForkDbError::Internal(format!(
                "column {} has unknown type tag {:#x}",
                column.name, column.tag
            ))
        })?;
        let count = usize::try_from(column.count).unwrap_or(0);
        if ty != ColumnType::Null && column.data.len() != count * ty.width() {
            return Err(ForkDbError::Internal(format!(
                "column {} holds {} bytes for {count} {ty} values",
                column.name,
                column.data.len()
            )));
        }
        let data = &column.data;
        Ok(match ty {
            ColumnType::Null => Value::Null,
            ColumnType::Char => Value::Text(String::from_utf8_lossy(data).into_owned()),
            ColumnType::Byte => Value::Blob(data.clone()),
            ColumnType::Int16 => numbers(data, 2, |b| {
                Value::Integer(i64::from(i16::from_le_bytes([b[0], b[1]])))
            }),
            ColumnType::Int32 => numbers(data, 4, |b| {
                Value::Integer(i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            }),
            ColumnType::Int64 => {
                numbers(data, 8, |b| Value::Integer(i64::from_le_bytes(eight(b))))
            }
            ColumnType::Float32 => numbers(data, 4, |b| {
                Value::Real(f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            }),
            ColumnType::Float64 => {
                numbers(data, 8, |b| Value::Real(f64::from_le_bytes(eight(b))))
            }
        })
    }
}

fn eight(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(b);
    out
}

/// No elements decode to NULL, one to a scalar, more to a list.
fn numbers(data: &[u8], width: usize, decode: impl Fn(&[u8]) -> Value) -> Value {
    let mut values: Vec<Value> = data.chunks_exact(width).map(decode).collect();
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::List(values),
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One decoded row: column names with their values, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    names: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn from_result_set(rs: &ResultSet) -> Result<Self, ForkDbError> {
        let values = rs
            .columns
            .iter()
            .map(Value::from_column)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            names: rs.names().map(str::to_string).collect(),
            values,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the first column called `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let i = self.names.iter().position(|n| n == name)?;
        self.values.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(&self.values)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, i: usize) -> &Value {
        &self.values[i]
    }
}

impl Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_decode_by_type() {
        let rs = ResultSet::new(vec![
            Column::new("i", ColumnType::Int64, 1, 7i64.to_le_bytes().to_vec()),
            Column::new("r", ColumnType::Float64, 1, 2.5f64.to_le_bytes().to_vec()),
            Column::new("t", ColumnType::Char, 2, b"hi".to_vec()),
            Column::new("b", ColumnType::Byte, 2, vec![0, 1]),
            Column::null("n"),
        ]);
        let row = Row::from_result_set(&rs).expect("decode");
        assert_eq!(row.get("i"), Some(&Value::Integer(7)));
        assert_eq!(row.get("r"), Some(&Value::Real(2.5)));
        assert_eq!(row.get("t").and_then(Value::as_str), Some("hi"));
        assert_eq!(row.get("b"), Some(&Value::Blob(vec![0, 1])));
        assert!(row[4].is_null());
    }

    #[test]
    fn multi_element_numbers_become_lists() {
        let mut data = Vec::new();
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&2i32.to_le_bytes());
        let col = Column::new("v", ColumnType::Int32, 2, data);
        assert_eq!(
            Value::from_column(&col).expect("decode"),
            Value::List(vec![Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn inconsistent_length_is_rejected() {
        let col = Column::new("v", ColumnType::Int64, 2, vec![0; 8]);
        assert!(Value::from_column(&col).is_err());
    }

    #[test]
    fn values_bind_as_matching_parameters() {
        let p = Value::from("x").to_parameter(3).expect("text");
        assert_eq!(p, Parameter::text(3, "x"));
        assert_eq!(Value::from(None::<i64>).to_parameter(0).expect("null"), Parameter::null(0));
        assert!(Value::List(vec![]).to_parameter(0).is_err());
    }

    #[test]
    fn rows_serialize_as_objects() {
        let rs = ResultSet::new(vec![Column::new(
            "id",
            ColumnType::Int64,
            1,
            1i64.to_le_bytes().to_vec(),
        )]);
        let row = Row::from_result_set(&rs).expect("decode");
        assert_eq!(serde_json::to_string(&row).expect("json"), r#"{"id":1}"#);
    }
}
