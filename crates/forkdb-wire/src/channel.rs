// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parent side of a worker channel.
//!
//! Every call is one synchronous exchange: opcode, fixed arguments, an
//! optional chunked payload, then a status word (and for some opcodes a
//! chunked reply). Any transport failure marks the channel broken; a broken
//! channel refuses further calls until its worker is respawned.

use std::time::Duration;

use forkdb_core::{CountInfo, ForkDbError, Parameter, ResultSet, WorkerId};

use crate::chunk::{receive_bytes, receive_chunks, send_bytes};
use crate::codec;
use crate::error::WireError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::protocol::{Opcode, fetch_status, open_status, status};
use crate::shm::{ErrorBuffer, SharedBuffer};

/// Reply to a status-returning request, before it is mapped to an error.
enum Reply {
    Ok,
    OkWithValue,
    Failed,
    InvalidSession,
    Cancelled,
}

#[derive(Debug)]
pub struct Channel {
    worker: WorkerId,
    to_worker: PipeWriter,
    from_worker: PipeReader,
    shm: SharedBuffer,
    errors: ErrorBuffer,
    aux: Vec<u8>,
    broken: bool,
    last_handshakes: usize,
}

impl Channel {
    pub fn new(
        worker: WorkerId,
        to_worker: PipeWriter,
        from_worker: PipeReader,
        shm: SharedBuffer,
        errors: ErrorBuffer,
    ) -> Self {
        Self {
            worker,
            to_worker,
            from_worker,
            shm,
            errors,
            aux: Vec::new(),
            broken: false,
            last_handshakes: 0,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn shared_buffer(&self) -> &SharedBuffer {
        &self.shm
    }

    /// Whether a transport failure has desynchronized this channel.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.from_worker.set_timeout(timeout);
    }

    /// "More chunks" handshakes performed by the last fetch.
    pub fn last_handshakes(&self) -> usize {
        self.last_handshakes
    }

    /// Runs one exchange, marking the channel broken if it fails.
    fn exchange<T>(
        &mut self,
        op: Opcode,
        f: impl FnOnce(&mut Self) -> Result<T, WireError>,
    ) -> Result<T, ForkDbError> {
        if self.broken {
            return Err(ForkDbError::Channel {
                worker: self.worker,
                message: "channel is broken; worker will be respawned".to_string(),
                source: None,
            });
        }
        match f(self) {
            Ok(v) => Ok(v),
            Err(err) => {
                self.broken = true;
                tracing::warn!(worker = self.worker, op = %op, error = %err, "worker channel failed");
                Err(err.into_fork_error(self.worker))
            }
        }
    }

    fn send_header(&mut self, op: Opcode, args: &[i32]) -> Result<(), WireError> {
        let mut frame = Vec::with_capacity(1 + 4 * args.len());
        frame.push(op.as_byte());
        for a in args {
            frame.extend_from_slice(&a.to_le_bytes());
        }
        self.to_worker.write_all(&frame)
    }

    fn send_payload(&mut self, data: &[u8]) -> Result<(), WireError> {
        send_bytes(&self.shm, &mut self.to_worker, &mut self.from_worker, data).map(|_| ())
    }

    fn read_reply(&mut self) -> Result<Reply, WireError> {
        Ok(match self.from_worker.read_i32()? {
            status::OK => Reply::Ok,
            status::OK_WITH_VALUE => Reply::OkWithValue,
            status::FAILED => Reply::Failed,
            status::INVALID_SESSION => Reply::InvalidSession,
            status::CANCELLED => Reply::Cancelled,
            other => return Err(WireError::protocol(format!("unexpected status {other}"))),
        })
    }

    fn check(&self, reply: Reply, index: i32) -> Result<(), ForkDbError> {
        match reply {
            Reply::Ok | Reply::OkWithValue => Ok(()),
            Reply::Failed => Err(ForkDbError::engine(self.errors.message())),
            Reply::InvalidSession => Err(ForkDbError::InvalidSession {
                worker: self.worker,
                index,
            }),
            Reply::Cancelled => Err(ForkDbError::Cancelled {
                worker: self.worker,
            }),
        }
    }

    fn simple(
        &mut self,
        op: Opcode,
        args: &[i32],
        payload: Option<&[u8]>,
    ) -> Result<(), ForkDbError> {
        let index = args.first().copied().unwrap_or(-1);
        let reply = self.exchange(op, |ch| {
            ch.send_header(op, args)?;
            if let Some(data) = payload {
                ch.send_payload(data)?;
            }
            ch.read_reply()
        })?;
        self.check(reply, index)
    }

    /// Opens (or reuses) a worker-local session for `path`.
    pub fn open(&mut self, path: &str) -> Result<i32, ForkDbError> {
        let index = self.exchange(Opcode::Open, |ch| {
            ch.send_header(Opcode::Open, &[])?;
            ch.send_payload(path.as_bytes())?;
            let reply = ch.from_worker.read_i32()?;
            if reply < open_status::FAILED {
                return Err(WireError::protocol(format!("unexpected open reply {reply}")));
            }
            Ok(reply)
        })?;
        if index == open_status::FAILED {
            return Err(ForkDbError::engine(self.errors.message()));
        }
        Ok(index)
    }

    pub fn close(&mut self, index: i32) -> Result<(), ForkDbError> {
        self.simple(Opcode::Close, &[index], None)
    }

    pub fn prepare(&mut self, index: i32, sql: &str) -> Result<(), ForkDbError> {
        self.simple(Opcode::Prepare, &[index], Some(sql.as_bytes()))
    }

    pub fn execute(&mut self, index: i32) -> Result<(), ForkDbError> {
        self.simple(Opcode::Execute, &[index], None)
    }

    pub fn bind(&mut self, index: i32, param: &Parameter) -> Result<(), ForkDbError> {
        self.simple(
            Opcode::Bind,
            &[
                index,
                param.index,
                param.input_type as i32,
                param.sql_type as i32,
            ],
            Some(&param.data),
        )
    }

    pub fn reset_params(&mut self, index: i32) -> Result<(), ForkDbError> {
        self.simple(Opcode::ResetParams, &[index], None)
    }

    pub fn flush(&mut self, index: i32) -> Result<(), ForkDbError> {
        self.simple(Opcode::Flush, &[index], None)
    }

    pub fn skip(&mut self, index: i32, rows: i32) -> Result<(), ForkDbError> {
        self.simple(Opcode::Skip, &[index, rows], None)
    }

    pub fn counts(&mut self, index: i32) -> Result<CountInfo, ForkDbError> {
        let (reply, raw) = self.exchange(Opcode::Counts, |ch| {
            ch.send_header(Opcode::Counts, &[index])?;
            let reply = ch.read_reply()?;
            let mut raw = Vec::new();
            if matches!(reply, Reply::Ok) {
                ch.shm.read(0, codec::COUNT_INFO_LEN, &mut raw)?;
            }
            Ok((reply, raw))
        })?;
        self.check(reply, index)?;
        codec::decode_counts(&raw).map_err(|e| e.into_fork_error(self.worker))
    }

    /// Sets an engine property, returning the value the engine reports.
    pub fn set_property(
        &mut self,
        index: i32,
        name: &str,
        value: &str,
    ) -> Result<Option<String>, ForkDbError> {
        let payload = codec::encode_property(name, value);
        let (reply, returned) = self.exchange(Opcode::SetProperty, |ch| {
            ch.send_header(Opcode::SetProperty, &[index])?;
            ch.send_payload(&payload)?;
            let reply = ch.read_reply()?;
            let returned = if matches!(reply, Reply::OkWithValue) {
                receive_bytes(&ch.shm, &mut ch.from_worker, &mut ch.to_worker, &mut ch.aux)?;
                Some(codec::utf8(&ch.aux, "property value")?)
            } else {
                None
            };
            Ok((reply, returned))
        })?;
        self.check(reply, index)?;
        Ok(returned)
    }

    /// Fetches the next row; `None` once the statement is exhausted.
    pub fn fetch(&mut self, index: i32) -> Result<Option<ResultSet>, ForkDbError> {
        let outcome = self.exchange(Opcode::Fetch, |ch| {
            ch.send_header(Opcode::Fetch, &[index])?;
            let first = ch.from_worker.read_i32()?;
            match first {
                fetch_status::END
                | fetch_status::FAILED
                | fetch_status::CANCELLED
                | fetch_status::INVALID_SESSION => return Ok(Err(first)),
                _ => {}
            }
            ch.last_handshakes =
                receive_chunks(&ch.shm, &mut ch.from_worker, &mut ch.to_worker, first, &mut ch.aux)?;
            codec::decode_result_set(&ch.aux).map(Ok)
        })?;
        match outcome {
            Ok(rs) => Ok(Some(rs)),
            Err(fetch_status::END) => Ok(None),
            Err(fetch_status::CANCELLED) => Err(ForkDbError::Cancelled {
                worker: self.worker,
            }),
            Err(fetch_status::INVALID_SESSION) => Err(ForkDbError::InvalidSession {
                worker: self.worker,
                index,
            }),
            Err(_) => Err(ForkDbError::engine(self.errors.message())),
        }
    }
}
