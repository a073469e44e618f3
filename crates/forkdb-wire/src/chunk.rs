// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chunked transfers through a fixed-size shared buffer.
//!
//! A writer fills the shared buffer from offset 0. When the next write does
//! not fit, it copies what does fit, sends the negated capacity over the data
//! pipe, waits for a one-byte [`ACK`] on the reverse pipe, and starts over at
//! offset 0. A non-negative size ends the transfer and tells the reader how
//! many bytes of the last chunk are valid.
//!
//! Offsets seen by [`ChunkSink`] are logical stream offsets, so alignment is
//! unaffected by where chunk boundaries fall.

use crate::error::WireError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::protocol::ACK;
use crate::shm::SharedBuffer;

const ZEROS: [u8; 8] = [0; 8];

/// A byte stream with a logical write offset.
pub trait ChunkSink {
    fn put(&mut self, data: &[u8]) -> Result<(), WireError>;

    /// Bytes written so far, padding included.
    fn offset(&self) -> usize;

    /// Pads with zeros to a multiple of `width`, then writes `data`.
    fn put_aligned(&mut self, data: &[u8], width: usize) -> Result<(), WireError> {
        let pad = padding(self.offset(), width);
        if pad > 0 {
            self.put(&ZEROS[..pad])?;
        }
        self.put(data)
    }

    fn put_i32(&mut self, v: i32) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }
}

/// Zero bytes needed to move `offset` to a multiple of `width`.
pub fn padding(offset: usize, width: usize) -> usize {
    if width <= 1 {
        0
    } else {
        (width - offset % width) % width
    }
}

impl ChunkSink for Vec<u8> {
    fn put(&mut self, data: &[u8]) -> Result<(), WireError> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn offset(&self) -> usize {
        self.len()
    }
}

/// Counts bytes without storing them.
#[derive(Debug, Default)]
pub struct ByteCounter(pub usize);

impl ChunkSink for ByteCounter {
    fn put(&mut self, data: &[u8]) -> Result<(), WireError> {
        self.0 += data.len();
        Ok(())
    }

    fn offset(&self) -> usize {
        self.0
    }
}

/// Writes one chunked transfer into a shared buffer.
pub struct ChunkWriter<'a> {
    shm: &'a SharedBuffer,
    data_out: &'a mut PipeWriter,
    ack_in: &'a mut PipeReader,
    pos: usize,
    logical: usize,
    handshakes: usize,
}

impl<'a> ChunkWriter<'a> {
    /// Starts a transfer with the buffer cursor reset.
    pub fn new(
        shm: &'a SharedBuffer,
        data_out: &'a mut PipeWriter,
        ack_in: &'a mut PipeReader,
    ) -> Self {
        Self {
            shm,
            data_out,
            ack_in,
            pos: 0,
            logical: 0,
            handshakes: 0,
        }
    }

    /// Sends the final chunk size and returns the number of "more chunks"
    /// handshakes performed.
    pub fn finish(self) -> Result<usize, WireError> {
        let size = i32::try_from(self.pos)
            .map_err(|_| WireError::protocol("final chunk size exceeds i32"))?;
        self.data_out.write_i32(size)?;
        Ok(self.handshakes)
    }
}

impl ChunkSink for ChunkWriter<'_> {
    fn put(&mut self, mut data: &[u8]) -> Result<(), WireError> {
        let capacity = self.shm.capacity();
        let mut remaining = capacity - self.pos;
        while data.len() > remaining {
            self.shm.write(self.pos, &data[..remaining])?;
            self.data_out.write_i32(-(capacity as i32))?;
            match self.ack_in.read_byte()? {
                Some(ACK) => {}
                Some(other) => {
                    return Err(WireError::protocol(format!(
                        "expected chunk ack, got byte {other:#04x}"
                    )));
                }
                None => return Err(WireError::Closed),
            }
            data = &data[remaining..];
            self.logical += remaining;
            self.pos = 0;
            remaining = capacity;
            self.handshakes += 1;
        }
        self.shm.write(self.pos, data)?;
        self.pos += data.len();
        self.logical += data.len();
        Ok(())
    }

    fn offset(&self) -> usize {
        self.logical
    }
}

/// Assembles a chunked transfer whose first size word has already been read.
///
/// `aux` is cleared and receives every byte of the transfer. Returns the
/// number of "more chunks" handshakes.
pub fn receive_chunks(
    shm: &SharedBuffer,
    data_in: &mut PipeReader,
    ack_out: &mut PipeWriter,
    first: i32,
    aux: &mut Vec<u8>,
) -> Result<usize, WireError> {
    aux.clear();
    let capacity = shm.capacity();
    let more = -(capacity as i32);
    let mut size = first;
    let mut handshakes = 0;
    while size < 0 {
        if size != more {
            return Err(WireError::protocol(format!(
                "unexpected chunk size {size} for capacity {capacity}"
            )));
        }
        shm.read(0, capacity, aux)?;
        ack_out.write_byte(ACK)?;
        size = data_in.read_i32()?;
        handshakes += 1;
    }
    shm.read(0, size as usize, aux)?;
    Ok(handshakes)
}

/// Sends `data` as a complete transfer.
pub fn send_bytes(
    shm: &SharedBuffer,
    data_out: &mut PipeWriter,
    ack_in: &mut PipeReader,
    data: &[u8],
) -> Result<usize, WireError> {
    let mut writer = ChunkWriter::new(shm, data_out, ack_in);
    writer.put(data)?;
    writer.finish()
}

/// Receives a complete transfer into `aux`.
pub fn receive_bytes(
    shm: &SharedBuffer,
    data_in: &mut PipeReader,
    ack_out: &mut PipeWriter,
    aux: &mut Vec<u8>,
) -> Result<usize, WireError> {
    let first = data_in.read_i32()?;
    receive_chunks(shm, data_in, ack_out, first, aux)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_reaches_next_multiple() {
        assert_eq!(padding(0, 8), 0);
        assert_eq!(padding(1, 8), 7);
        assert_eq!(padding(5, 4), 3);
        assert_eq!(padding(6, 2), 0);
        assert_eq!(padding(7, 1), 0);
    }

    #[test]
    fn aligned_put_pads_vec_sink() {
        let mut sink = vec![0xffu8; 3];
        sink.put_aligned(&[1, 0, 0, 0], 4).expect("put");
        assert_eq!(sink, vec![0xff, 0xff, 0xff, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn counter_tracks_padding() {
        let mut counter = ByteCounter::default();
        counter.put(&[1]).expect("put");
        counter.put_aligned(&[0; 8], 8).expect("put");
        assert_eq!(counter.offset(), 16);
    }
}
