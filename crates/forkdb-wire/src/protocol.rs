// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opcodes, status codes and shared-buffer header layout.
//!
//! Every integer on the pipes and in the shared buffer is a little-endian i32
//! unless stated otherwise.

use std::fmt;

/// One byte at the start of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Open = b'o',
    Close = b'c',
    Prepare = b'p',
    Execute = b'e',
    Fetch = b'f',
    Bind = b'P',
    ResetParams = b'r',
    Flush = b'F',
    Skip = b's',
    Counts = b'g',
    SetProperty = b'S',
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, u8> {
        Ok(match b {
            b'o' => Opcode::Open,
            b'c' => Opcode::Close,
            b'p' => Opcode::Prepare,
            b'e' => Opcode::Execute,
            b'f' => Opcode::Fetch,
            b'P' => Opcode::Bind,
            b'r' => Opcode::ResetParams,
            b'F' => Opcode::Flush,
            b's' => Opcode::Skip,
            b'g' => Opcode::Counts,
            b'S' => Opcode::SetProperty,
            other => return Err(other),
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Open => "open",
            Opcode::Close => "close",
            Opcode::Prepare => "prepare",
            Opcode::Execute => "execute",
            Opcode::Fetch => "fetch",
            Opcode::Bind => "bind",
            Opcode::ResetParams => "reset_params",
            Opcode::Flush => "flush",
            Opcode::Skip => "skip",
            Opcode::Counts => "counts",
            Opcode::SetProperty => "set_property",
        };
        f.write_str(name)
    }
}

/// Status replies for every opcode except open and fetch.
pub mod status {
    pub const OK: i32 = 1;
    /// Set-property succeeded and a chunked value follows.
    pub const OK_WITH_VALUE: i32 = 2;
    /// Engine failure; the message is in the error buffer.
    pub const FAILED: i32 = 0;
    pub const INVALID_SESSION: i32 = -1;
    pub const CANCELLED: i32 = -2;
}

/// Replies to open: a session index `>= 0`, or one of these.
pub mod open_status {
    /// Engine failure; the message is in the error buffer.
    pub const FAILED: i32 = -1;
}

/// Replies to fetch: a final chunk size `>= 0`, the negated buffer capacity
/// ("more chunks"), or one of these.
pub mod fetch_status {
    pub const END: i32 = -1;
    pub const FAILED: i32 = -2;
    pub const CANCELLED: i32 = -3;
    pub const INVALID_SESSION: i32 = -4;
}

/// Acknowledgement byte sent by the receiver of a "more chunks" sentinel.
pub const ACK: u8 = b'C';

/// `"FKDB"` read as a little-endian u32.
pub const MAGIC: u32 = u32::from_le_bytes(*b"FKDB");

pub const PROTOCOL_VERSION: u32 = 1;

/// Shared-buffer header layout. The payload starts at [`HEADER_LEN`].
pub mod header {
    pub const MAGIC_OFFSET: usize = 0;
    pub const VERSION_OFFSET: usize = 4;
    pub const CANCEL_EPOCH_OFFSET: usize = 8;
    pub const HEADER_LEN: usize = 64;
}

pub use header::HEADER_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_round_trip_through_bytes() {
        for op in [
            Opcode::Open,
            Opcode::Close,
            Opcode::Prepare,
            Opcode::Execute,
            Opcode::Fetch,
            Opcode::Bind,
            Opcode::ResetParams,
            Opcode::Flush,
            Opcode::Skip,
            Opcode::Counts,
            Opcode::SetProperty,
        ] {
            assert_eq!(Opcode::try_from(op.as_byte()), Ok(op));
        }
        assert_eq!(Opcode::try_from(b'x'), Err(b'x'));
    }

    #[test]
    fn fetch_statuses_are_distinct_from_chunk_sentinels() {
        // The smallest accepted capacity is 64, so -capacity <= -64.
        for s in [
            fetch_status::END,
            fetch_status::FAILED,
            fetch_status::CANCELLED,
            fetch_status::INVALID_SESSION,
        ] {
            assert!(s > -64);
        }
    }
}
