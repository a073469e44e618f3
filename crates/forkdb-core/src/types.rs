// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the engine traits, the wire codec and the handle cache.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifies a logical execution context. Stable for the lifetime of a host thread.
pub type WorkerId = u32;

/// Mask applied to a wire type tag to recover the base [`ColumnType`].
pub const TYPE_TAG_MASK: i32 = 0x3f;

/// Flag bit marking a variable-length column (text and blobs).
pub const VAR_FLAG: i32 = 0x40;

/// Element type of a result column. The discriminant is the wire tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[repr(i32)]
pub enum ColumnType {
    Byte = 1,
    Char = 2,
    Int16 = 3,
    Int32 = 4,
    Int64 = 5,
    Float32 = 6,
    Float64 = 7,
    Null = 8,
}

impl ColumnType {
    /// Size in bytes of one element; also the alignment of the data region.
    pub fn width(self) -> usize {
        match self {
            ColumnType::Byte | ColumnType::Char | ColumnType::Null => 1,
            ColumnType::Int16 => 2,
            ColumnType::Int32 | ColumnType::Float32 => 4,
            ColumnType::Int64 | ColumnType::Float64 => 8,
        }
    }

    /// Decodes a wire tag, ignoring flag bits above [`TYPE_TAG_MASK`].
    pub fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag & TYPE_TAG_MASK {
            1 => ColumnType::Byte,
            2 => ColumnType::Char,
            3 => ColumnType::Int16,
            4 => ColumnType::Int32,
            5 => ColumnType::Int64,
            6 => ColumnType::Float32,
            7 => ColumnType::Float64,
            8 => ColumnType::Null,
            _ => return None,
        })
    }
}

/// One column of a [`ResultSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Full wire tag: base type in the low bits plus flags such as [`VAR_FLAG`].
    pub tag: i32,
    /// Number of elements of `column_type().width()` bytes in `data`.
    pub count: i32,
    pub data: Vec<u8>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType, count: i32, data: Vec<u8>) -> Self {
        let tag = match ty {
            ColumnType::Char | ColumnType::Byte => ty as i32 | VAR_FLAG,
            _ => ty as i32,
        };
        Self {
            name: name.into(),
            tag,
            count,
            data,
        }
    }

    /// A column with no data, sent with count 0.
    pub fn null(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Null, 0, Vec::new())
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        ColumnType::from_tag(self.tag)
    }
}

/// A table row or column batch ("field list").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<Column>,
}

impl ResultSet {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Row statistics reported by the engine after execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountInfo {
    pub rows_matched_min: i64,
    pub rows_matched_max: i64,
    pub rows_returned_min: i64,
    pub rows_returned_max: i64,
    pub index_count: i64,
}

/// How the bytes of a bound parameter are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[repr(i32)]
pub enum InputType {
    /// No payload; binds SQL NULL.
    Null = 0,
    /// UTF-8 text.
    Char = 1,
    /// 8-byte little-endian signed integer.
    Integer = 2,
    /// 8-byte little-endian IEEE 754 double.
    Double = 3,
    /// Opaque bytes.
    Binary = 4,
}

impl InputType {
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => InputType::Null,
            1 => InputType::Char,
            2 => InputType::Integer,
            3 => InputType::Double,
            4 => InputType::Binary,
            _ => return None,
        })
    }
}

/// The SQL type a parameter should take on inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[repr(i32)]
pub enum SqlType {
    Null = 0,
    Varchar = 1,
    Integer = 2,
    Double = 3,
    Varbinary = 4,
}

impl SqlType {
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => SqlType::Null,
            1 => SqlType::Varchar,
            2 => SqlType::Integer,
            3 => SqlType::Double,
            4 => SqlType::Varbinary,
            _ => return None,
        })
    }
}

/// A positional statement parameter (0-based index).
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub index: i32,
    pub data: Vec<u8>,
    pub input_type: InputType,
    pub sql_type: SqlType,
}

impl Parameter {
    pub fn null(index: i32) -> Self {
        Self {
            index,
            data: Vec::new(),
            input_type: InputType::Null,
            sql_type: SqlType::Null,
        }
    }

    pub fn text(index: i32, text: &str) -> Self {
        Self {
            index,
            data: text.as_bytes().to_vec(),
            input_type: InputType::Char,
            sql_type: SqlType::Varchar,
        }
    }

    pub fn integer(index: i32, v: i64) -> Self {
        Self {
            index,
            data: v.to_le_bytes().to_vec(),
            input_type: InputType::Integer,
            sql_type: SqlType::Integer,
        }
    }

    pub fn double(index: i32, v: f64) -> Self {
        Self {
            index,
            data: v.to_le_bytes().to_vec(),
            input_type: InputType::Double,
            sql_type: SqlType::Double,
        }
    }

    pub fn binary(index: i32, bytes: &[u8]) -> Self {
        Self {
            index,
            data: bytes.to_vec(),
            input_type: InputType::Binary,
            sql_type: SqlType::Varbinary,
        }
    }
}

/// An ordered snapshot of engine properties applied to a session.
///
/// Two snapshots with the same entries have the same [`Settings::fingerprint`],
/// which the handle cache compares to decide whether a session needs them applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Settings {
    entries: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with overrides; overrides win on conflicting names.
    pub fn merged(defaults: &BTreeMap<String, String>, overrides: &Settings) -> Self {
        let mut entries = defaults.clone();
        for (k, v) in &overrides.entries {
            entries.insert(k.clone(), v.clone());
        }
        Self { entries }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.entries.hash(&mut hasher);
        hasher.finish()
    }
}

impl From<BTreeMap<String, String>> for Settings {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}
