// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flat byte layouts for result sets, row counts and request arguments.
//!
//! A result set is laid out as
//! `[n][tag_0..tag_{n-1}][count_0..count_{n-1}][name_0\0..name_{n-1}\0][data_0..data_{n-1}]`
//! where every integer is a little-endian i32 and each data region starts at
//! a multiple of its element width. Columns without data are sent with count 0
//! and occupy no bytes.

use forkdb_core::{Column, ColumnType, CountInfo, ResultSet};

use crate::chunk::{ByteCounter, ChunkSink, padding};
use crate::error::WireError;

/// Writes `rs` to `sink`.
pub fn encode_result_set<S: ChunkSink + ?Sized>(
    rs: &ResultSet,
    sink: &mut S,
) -> Result<(), WireError> {
    let n = i32::try_from(rs.columns.len())
        .map_err(|_| WireError::protocol("too many columns"))?;
    sink.put_i32(n)?;

    for col in &rs.columns {
        sink.put_i32(col.tag)?;
    }

    for col in &rs.columns {
        let count = if col.data.is_empty() { 0 } else { col.count };
        sink.put_i32(count)?;
    }

    for col in &rs.columns {
        if col.name.as_bytes().contains(&0) {
            return Err(WireError::protocol(format!(
                "column name {:?} contains NUL",
                col.name
            )));
        }
        sink.put(col.name.as_bytes())?;
        sink.put(&[0])?;
    }

    for col in &rs.columns {
        if col.data.is_empty() {
            continue;
        }
        let ty = column_type(col.tag)?;
        let width = ty.width();
        let expected = element_bytes(col.count, width)?;
        if expected != col.data.len() {
            return Err(WireError::protocol(format!(
                "column {:?} has {} bytes for {} elements of width {width}",
                col.name,
                col.data.len(),
                col.count
            )));
        }
        sink.put_aligned(&col.data, width)?;
    }

    Ok(())
}

/// Size in bytes of `rs` once encoded, padding included.
pub fn encoded_len(rs: &ResultSet) -> Result<usize, WireError> {
    let mut counter = ByteCounter::default();
    encode_result_set(rs, &mut counter)?;
    Ok(counter.0)
}

/// Rebuilds a result set from the bytes of a complete transfer.
pub fn decode_result_set(bytes: &[u8]) -> Result<ResultSet, WireError> {
    let mut cur = Cursor::new(bytes);
    let n = cur.read_i32()?;
    let n = usize::try_from(n).map_err(|_| WireError::protocol("negative column count"))?;
    // Every column needs at least a tag, a count and a name terminator.
    if n.saturating_mul(9) > cur.remaining() {
        return Err(WireError::protocol(format!(
            "column count {n} exceeds payload of {} bytes",
            bytes.len()
        )));
    }

    let mut tags = Vec::with_capacity(n);
    for _ in 0..n {
        tags.push(cur.read_i32()?);
    }
    let mut counts = Vec::with_capacity(n);
    for _ in 0..n {
        counts.push(cur.read_i32()?);
    }
    let mut names = Vec::with_capacity(n);
    for _ in 0..n {
        names.push(cur.read_cstr()?);
    }

    let mut columns = Vec::with_capacity(n);
    for ((tag, count), name) in tags.into_iter().zip(counts).zip(names) {
        let width = column_type(tag)?.width();
        let size = element_bytes(count, width)?;
        let data = if size == 0 {
            Vec::new()
        } else {
            cur.align(width)?;
            cur.take(size)?.to_vec()
        };
        columns.push(Column {
            name,
            tag,
            count,
            data,
        });
    }

    Ok(ResultSet { columns })
}

fn column_type(tag: i32) -> Result<ColumnType, WireError> {
    ColumnType::from_tag(tag).ok_or_else(|| WireError::protocol(format!("unknown type tag {tag}")))
}

fn element_bytes(count: i32, width: usize) -> Result<usize, WireError> {
    usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_mul(width))
        .ok_or_else(|| WireError::protocol(format!("invalid element count {count}")))
}

/// Bytes of an encoded [`CountInfo`].
pub const COUNT_INFO_LEN: usize = 40;

pub fn encode_counts(info: &CountInfo) -> [u8; COUNT_INFO_LEN] {
    let mut out = [0u8; COUNT_INFO_LEN];
    let fields = [
        info.rows_matched_min,
        info.rows_matched_max,
        info.rows_returned_min,
        info.rows_returned_max,
        info.index_count,
    ];
    for (chunk, v) in out.chunks_exact_mut(8).zip(fields) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_counts(bytes: &[u8]) -> Result<CountInfo, WireError> {
    let mut cur = Cursor::new(bytes);
    Ok(CountInfo {
        rows_matched_min: cur.read_i64()?,
        rows_matched_max: cur.read_i64()?,
        rows_returned_min: cur.read_i64()?,
        rows_returned_max: cur.read_i64()?,
        index_count: cur.read_i64()?,
    })
}

/// `name\0value`.
pub fn encode_property(name: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + value.len() + 1);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.extend_from_slice(value.as_bytes());
    out
}

pub fn decode_property(bytes: &[u8]) -> Result<(String, String), WireError> {
    let split = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| WireError::protocol("property without name terminator"))?;
    Ok((
        utf8(&bytes[..split], "property name")?,
        utf8(&bytes[split + 1..], "property value")?,
    ))
}

/// Decodes request text (paths, statements) sent as raw bytes.
pub fn utf8(bytes: &[u8], what: &str) -> Result<String, WireError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::protocol(format!("{what} is not UTF-8")))
}

/// Bounds-checked little-endian reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if len > self.remaining() {
            return Err(WireError::protocol(format!(
                "need {len} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn align(&mut self, width: usize) -> Result<(), WireError> {
        let pad = padding(self.pos, width);
        self.take(pad).map(|_| ())
    }

    fn read_i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64, WireError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    fn read_cstr(&mut self) -> Result<String, WireError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| WireError::protocol("unterminated column name"))?;
        let name = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        ResultSet::new(vec![
            Column::new("flag", ColumnType::Byte, 1, vec![7]),
            Column::new("id", ColumnType::Int64, 1, 42i64.to_le_bytes().to_vec()),
            Column::null("nothing"),
            Column::new("name", ColumnType::Char, 5, b"hello".to_vec()),
            Column::new("score", ColumnType::Float64, 1, 1.5f64.to_le_bytes().to_vec()),
        ])
    }

    #[test]
    fn layout_matches_field_list_format() {
        let rs = ResultSet::new(vec![
            Column::new("a", ColumnType::Byte, 1, vec![9]),
            Column::new("b", ColumnType::Int32, 1, 5i32.to_le_bytes().to_vec()),
        ]);
        let mut out = Vec::new();
        encode_result_set(&rs, &mut out).expect("encode");

        // n, two tags, two counts, "a\0b\0", byte, pad to 24, int32.
        assert_eq!(&out[0..4], &2i32.to_le_bytes());
        assert_eq!(&out[12..16], &1i32.to_le_bytes());
        assert_eq!(&out[20..24], b"a\0b\0");
        assert_eq!(out[24], 9);
        assert_eq!(&out[25..28], &[0, 0, 0]);
        assert_eq!(&out[28..32], &5i32.to_le_bytes());
        assert_eq!(out.len(), encoded_len(&rs).expect("len"));
    }

    #[test]
    fn decode_restores_every_column() {
        let rs = sample();
        let mut out = Vec::new();
        encode_result_set(&rs, &mut out).expect("encode");
        assert_eq!(decode_result_set(&out).expect("decode"), rs);
    }

    #[test]
    fn empty_data_is_sent_with_zero_count() {
        let rs = ResultSet::new(vec![Column {
            name: "x".into(),
            tag: ColumnType::Int32 as i32,
            count: 3,
            data: Vec::new(),
        }]);
        let mut out = Vec::new();
        encode_result_set(&rs, &mut out).expect("encode");
        let back = decode_result_set(&out).expect("decode");
        assert_eq!(back.columns[0].count, 0);
        assert!(back.columns[0].data.is_empty());
    }

    #[test]
    fn mismatched_length_is_rejected() {
        let rs = ResultSet::new(vec![Column::new("x", ColumnType::Int32, 2, vec![0; 4])]);
        assert!(encode_result_set(&rs, &mut Vec::new()).is_err());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut out = Vec::new();
        encode_result_set(&sample(), &mut out).expect("encode");
        for cut in [0, 3, 10, out.len() - 1] {
            assert!(decode_result_set(&out[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn absurd_column_count_is_rejected() {
        let bytes = i32::MAX.to_le_bytes();
        assert!(decode_result_set(&bytes).is_err());
    }

    #[test]
    fn counts_layout_is_five_i64() {
        let info = CountInfo {
            rows_matched_min: 1,
            rows_matched_max: 2,
            rows_returned_min: 3,
            rows_returned_max: 4,
            index_count: -1,
        };
        let raw = encode_counts(&info);
        assert_eq!(&raw[16..24], &3i64.to_le_bytes());
        assert_eq!(decode_counts(&raw).expect("decode"), info);
        assert!(decode_counts(&raw[..39]).is_err());
    }

    #[test]
    fn property_splits_on_first_nul() {
        let raw = encode_property("cache_size", "-2000");
        assert_eq!(
            decode_property(&raw).expect("decode"),
            ("cache_size".to_string(), "-2000".to_string())
        );
        assert!(decode_property(b"novalue").is_err());
    }
}
