// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anonymous shared mappings that survive `fork`.
//!
//! A worker channel owns two mappings: the shared buffer (a fixed header
//! followed by the payload area used for one exchange at a time) and the
//! error-message buffer. Both are created before the child is forked, so
//! parent and child see the same physical pages.

use std::io;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use forkdb_core::CancelEpoch;

use crate::error::WireError;
use crate::protocol::{HEADER_LEN, MAGIC, PROTOCOL_VERSION, header};

/// A `MAP_SHARED | MAP_ANONYMOUS` read/write mapping.
#[derive(Debug)]
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain memory. Byte copies are only issued by the
// single side that currently owns the exchange; concurrent access is limited
// to the header atomics.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    pub fn anonymous_shared(len: usize) -> Result<Self, WireError> {
        if len == 0 {
            return Err(WireError::Map(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-length mapping",
            )));
        }
        // SAFETY: anonymous mapping with no address hint; the result is checked.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(WireError::Map(io::Error::last_os_error()));
        }
        let ptr = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| WireError::Map(io::Error::other("mmap returned null")))?;
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), WireError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(WireError::protocol(format!(
                "range {offset}+{len} outside mapping of {} bytes",
                self.len
            ))),
        }
    }

    pub fn copy_in(&self, offset: usize, data: &[u8]) -> Result<(), WireError> {
        self.check(offset, data.len())?;
        // SAFETY: bounds checked above; `data` cannot overlap a fresh mmap region
        // handed out only through this type.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Appends `len` bytes starting at `offset` to `out`.
    pub fn copy_out(&self, offset: usize, len: usize, out: &mut Vec<u8>) -> Result<(), WireError> {
        self.check(offset, len)?;
        out.reserve(len);
        let start = out.len();
        // SAFETY: bounds checked above and `out` has `len` bytes of spare capacity.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                out.as_mut_ptr().add(start),
                len,
            );
            out.set_len(start + len);
        }
        Ok(())
    }

    pub fn fill(&self, offset: usize, len: usize, byte: u8) -> Result<(), WireError> {
        self.check(offset, len)?;
        // SAFETY: bounds checked above.
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr().add(offset), byte, len) };
        Ok(())
    }

    fn atomic_u32(&self, offset: usize) -> Option<NonNull<AtomicU32>> {
        if offset % std::mem::align_of::<AtomicU32>() != 0 || self.check(offset, 4).is_err() {
            return None;
        }
        // SAFETY: in bounds and aligned (the mapping itself is page aligned).
        NonNull::new(unsafe { self.ptr.as_ptr().add(offset) }.cast::<AtomicU32>())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` came from a successful mmap and are unmapped once.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

/// Fixed-capacity scratch area for one request/response exchange.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    map: Arc<Mapping>,
    capacity: usize,
}

impl SharedBuffer {
    /// Maps a buffer with `capacity` payload bytes and writes the header.
    pub fn new(capacity: usize) -> Result<Self, WireError> {
        if capacity == 0 || capacity > i32::MAX as usize {
            return Err(WireError::protocol(format!(
                "shared buffer capacity {capacity} does not fit the chunk sentinel"
            )));
        }
        let map = Mapping::anonymous_shared(HEADER_LEN + capacity)?;
        map.copy_in(header::MAGIC_OFFSET, &MAGIC.to_le_bytes())?;
        map.copy_in(header::VERSION_OFFSET, &PROTOCOL_VERSION.to_le_bytes())?;
        Ok(Self {
            map: Arc::new(map),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Verifies the magic and version words written by the creator.
    pub fn check_header(&self) -> Result<(), WireError> {
        let mut raw = Vec::with_capacity(8);
        self.map.copy_out(header::MAGIC_OFFSET, 8, &mut raw)?;
        let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if magic != MAGIC {
            return Err(WireError::protocol(format!("bad magic {magic:#010x}")));
        }
        if version != PROTOCOL_VERSION {
            return Err(WireError::protocol(format!(
                "protocol version {version}, expected {PROTOCOL_VERSION}"
            )));
        }
        Ok(())
    }

    /// The cancel epoch stored in the header.
    pub fn cancel_epoch(&self) -> Result<CancelEpoch, WireError> {
        let counter = self
            .map
            .atomic_u32(header::CANCEL_EPOCH_OFFSET)
            .ok_or_else(|| WireError::protocol("cancel epoch slot is not addressable"))?;
        let owner: Arc<dyn std::any::Any + Send + Sync> = self.map.clone();
        // SAFETY: the counter lives inside `map`, which `owner` keeps mapped.
        Ok(unsafe { CancelEpoch::from_raw(counter, owner) })
    }

    /// Copies `data` to payload offset `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), WireError> {
        if offset + data.len() > self.capacity {
            return Err(WireError::protocol("write past shared buffer capacity"));
        }
        self.map.copy_in(HEADER_LEN + offset, data)
    }

    /// Appends `len` payload bytes starting at `offset` to `out`.
    pub fn read(&self, offset: usize, len: usize, out: &mut Vec<u8>) -> Result<(), WireError> {
        if offset + len > self.capacity {
            return Err(WireError::protocol(format!(
                "read of {len} bytes past shared buffer capacity {}",
                self.capacity
            )));
        }
        self.map.copy_out(HEADER_LEN + offset, len, out)
    }
}

/// Fixed-size, NUL-terminated engine error message area.
#[derive(Debug, Clone)]
pub struct ErrorBuffer {
    map: Arc<Mapping>,
}

impl ErrorBuffer {
    pub fn new(len: usize) -> Result<Self, WireError> {
        Ok(Self {
            map: Arc::new(Mapping::anonymous_shared(len)?),
        })
    }

    pub fn clear(&self) {
        // Offset 0 is always in bounds for a non-empty mapping.
        let _ = self.map.fill(0, 1, 0);
    }

    /// Stores `message`, truncated to fit.
    pub fn set(&self, message: &str) {
        let max = self.map.len() - 1;
        let mut end = message.len().min(max);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        let _ = self.map.copy_in(0, &message.as_bytes()[..end]);
        let _ = self.map.fill(end, 1, 0);
    }

    pub fn message(&self) -> String {
        let mut raw = Vec::with_capacity(self.map.len());
        if self.map.copy_out(0, self.map.len(), &mut raw).is_err() {
            return String::new();
        }
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}
