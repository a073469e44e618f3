// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The request loop run by every worker process.
//!
//! One opcode at a time: read it, read its arguments, call the engine, write
//! the reply. Engine failures are replies, never exits. Transport failures and
//! unknown opcodes end the loop; the parent notices a broken channel and
//! respawns the worker on its next request.

use forkdb_core::{Engine, EngineError, InputType, Parameter, Session, SqlType};
use forkdb_wire::protocol::{fetch_status, open_status, status};
use forkdb_wire::{Endpoint, Opcode, WireError, codec};

use crate::sessions::SessionTable;

/// Why a command loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    /// The parent process no longer exists.
    ParentGone,
    /// The parent closed its end of the request pipe.
    Closed,
    /// The parent sent something outside the protocol.
    Protocol(String),
    /// Reading or writing a pipe failed.
    Transport(WireError),
}

impl LoopExit {
    /// Process exit status for this outcome.
    pub fn code(&self) -> i32 {
        match self {
            LoopExit::ParentGone | LoopExit::Closed => 0,
            LoopExit::Protocol(_) | LoopExit::Transport(_) => 1,
        }
    }
}

/// Result of running one engine call against a session.
enum Outcome<T> {
    Done(T),
    InvalidSession,
    Cancelled,
    Failed,
}

pub struct CommandLoop<'e, E: Engine> {
    engine: &'e E,
    endpoint: Endpoint,
    sessions: SessionTable<E>,
    parent: Option<libc::pid_t>,
}

impl<'e, E: Engine> CommandLoop<'e, E> {
    /// `parent` is checked for liveness before every request when given.
    pub fn new(
        engine: &'e E,
        endpoint: Endpoint,
        sessions: SessionTable<E>,
        parent: Option<libc::pid_t>,
    ) -> Self {
        Self {
            engine,
            endpoint,
            sessions,
            parent,
        }
    }

    pub fn run(mut self) -> LoopExit {
        if let Err(err) = self.endpoint.shared_buffer().check_header() {
            return LoopExit::Protocol(err.to_string());
        }
        loop {
            if let Some(pid) = self.parent
                && !process_exists(pid)
            {
                return LoopExit::ParentGone;
            }
            let byte = match self.endpoint.next_opcode() {
                Ok(Some(byte)) => byte,
                Ok(None) => return LoopExit::Closed,
                Err(err) => return LoopExit::Transport(err),
            };
            self.endpoint.clear_error();
            let op = match Opcode::try_from(byte) {
                Ok(op) => op,
                Err(other) => return LoopExit::Protocol(format!("unknown opcode {other:#04x}")),
            };
            match self.dispatch(op) {
                Ok(()) => {}
                Err(WireError::Protocol(message)) => return LoopExit::Protocol(message),
                Err(err) => return LoopExit::Transport(err),
            }
        }
    }

    fn dispatch(&mut self, op: Opcode) -> Result<(), WireError> {
        match op {
            Opcode::Open => {
                let path = self.endpoint.read_text("path")?;
                match self.sessions.open(self.engine, &path) {
                    Ok(index) => self.endpoint.reply(index),
                    Err(err) => {
                        self.endpoint.set_error(&err.to_string());
                        self.endpoint.reply(open_status::FAILED)
                    }
                }
            }
            Opcode::Close => {
                let index = self.endpoint.read_i32()?;
                let reply = if self.sessions.release(index) {
                    status::OK
                } else {
                    status::INVALID_SESSION
                };
                self.endpoint.reply(reply)
            }
            Opcode::Prepare => {
                let index = self.endpoint.read_i32()?;
                let sql = self.endpoint.read_text("statement")?;
                let outcome = self.call(index, |s| s.prepare(&sql));
                self.reply_status(outcome)
            }
            Opcode::Execute => {
                let index = self.endpoint.read_i32()?;
                let outcome = self.call(index, |s| s.execute());
                self.reply_status(outcome)
            }
            Opcode::Bind => {
                let index = self.endpoint.read_i32()?;
                let param_index = self.endpoint.read_i32()?;
                let input = self.endpoint.read_i32()?;
                let sql_type = self.endpoint.read_i32()?;
                let data = self.endpoint.read_payload()?.to_vec();
                let (Some(input_type), Some(sql_type)) =
                    (InputType::from_i32(input), SqlType::from_i32(sql_type))
                else {
                    self.endpoint
                        .set_error(&format!("unsupported parameter types {input}/{sql_type}"));
                    return self.endpoint.reply(status::FAILED);
                };
                let param = Parameter {
                    index: param_index,
                    data,
                    input_type,
                    sql_type,
                };
                let outcome = self.call(index, |s| s.bind(&param));
                self.reply_status(outcome)
            }
            Opcode::ResetParams => {
                let index = self.endpoint.read_i32()?;
                let outcome = self.call(index, |s| s.reset_params());
                self.reply_status(outcome)
            }
            Opcode::Flush => {
                let index = self.endpoint.read_i32()?;
                let outcome = self.call(index, |s| s.flush());
                self.reply_status(outcome)
            }
            Opcode::Skip => {
                let index = self.endpoint.read_i32()?;
                let rows = self.endpoint.read_i32()?;
                let outcome = self.call(index, |s| s.skip(rows));
                self.reply_status(outcome)
            }
            Opcode::Counts => {
                let index = self.endpoint.read_i32()?;
                match self.call(index, |s| s.counts()) {
                    Outcome::Done(info) => {
                        self.endpoint.write_counts(&info)?;
                        self.endpoint.reply(status::OK)
                    }
                    other => self.reply_status(other.map(|_| ())),
                }
            }
            Opcode::SetProperty => {
                let index = self.endpoint.read_i32()?;
                let (name, value) = codec::decode_property(self.endpoint.read_payload()?)?;
                match self.call(index, |s| s.set_property(&name, &value)) {
                    Outcome::Done(Some(returned)) => self
                        .endpoint
                        .reply_with_bytes(status::OK_WITH_VALUE, returned.as_bytes()),
                    other => self.reply_status(other.map(|_| ())),
                }
            }
            Opcode::Fetch => {
                let index = self.endpoint.read_i32()?;
                match self.call(index, |s| s.fetch()) {
                    Outcome::Done(Some(row)) => self.endpoint.reply_result_set(&row).map(|_| ()),
                    Outcome::Done(None) => self.endpoint.reply(fetch_status::END),
                    Outcome::InvalidSession => self.endpoint.reply(fetch_status::INVALID_SESSION),
                    Outcome::Cancelled => self.endpoint.reply(fetch_status::CANCELLED),
                    Outcome::Failed => self.endpoint.reply(fetch_status::FAILED),
                }
            }
        }
    }

    /// Runs `f` on an open session. A cancelled or failed call releases the
    /// session's slot; the parent reopens before using it again.
    fn call<T>(
        &mut self,
        index: i32,
        f: impl FnOnce(&mut E::Session) -> Result<T, EngineError>,
    ) -> Outcome<T> {
        let Some(session) = self.sessions.get(index) else {
            return Outcome::InvalidSession;
        };
        let result = if session.interrupt().is_raised() {
            Err(EngineError::Interrupted)
        } else {
            f(session)
        };
        match result {
            Ok(v) => Outcome::Done(v),
            Err(EngineError::Interrupted) => {
                self.sessions.release(index);
                Outcome::Cancelled
            }
            Err(EngineError::Failed(message)) => {
                self.endpoint.set_error(&message);
                self.sessions.release(index);
                Outcome::Failed
            }
        }
    }

    fn reply_status(&mut self, outcome: Outcome<()>) -> Result<(), WireError> {
        self.endpoint.reply(match outcome {
            Outcome::Done(()) => status::OK,
            Outcome::InvalidSession => status::INVALID_SESSION,
            Outcome::Cancelled => status::CANCELLED,
            Outcome::Failed => status::FAILED,
        })
    }
}

impl<T> Outcome<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(v) => Outcome::Done(f(v)),
            Outcome::InvalidSession => Outcome::InvalidSession,
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::Failed => Outcome::Failed,
        }
    }
}

fn process_exists(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks for existence and permission.
    unsafe { libc::kill(pid, 0) == 0 }
}
