// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine and session traits for embedded database backends (SQLite, etc.).

use crate::cancel::Interrupt;
use crate::error::EngineError;
use crate::types::{CountInfo, Parameter, ResultSet};

/// A database engine whose client library must not be called from more than
/// one thread at a time.
///
/// The engine value itself is shared: it is cloned into every forked worker
/// and opens sessions there. Sessions are single-threaded.
pub trait Engine: Send + Sync + 'static {
    type Session: Session;

    /// Short engine name used in logs.
    fn name(&self) -> &str;

    /// Opens a session on the database at `path`.
    ///
    /// The session must report [`EngineError::Interrupted`] from long-running
    /// calls once `interrupt` is raised.
    fn open(&self, path: &str, interrupt: Interrupt) -> Result<Self::Session, EngineError>;
}

/// A single-threaded engine session with at most one active statement.
pub trait Session: Send {
    /// Compiles `sql`, replacing any previous statement and its pending rows.
    fn prepare(&mut self, sql: &str) -> Result<(), EngineError>;

    /// Binds a positional parameter to the prepared statement.
    fn bind(&mut self, param: &Parameter) -> Result<(), EngineError>;

    /// Clears every bound parameter.
    fn reset_params(&mut self) -> Result<(), EngineError>;

    /// Runs the prepared statement.
    fn execute(&mut self) -> Result<(), EngineError>;

    /// Returns the next row, or `None` once the statement is exhausted.
    fn fetch(&mut self) -> Result<Option<ResultSet>, EngineError>;

    /// Discards up to `n` pending rows.
    fn skip(&mut self, n: i32) -> Result<(), EngineError>;

    /// Discards every pending row.
    fn flush(&mut self) -> Result<(), EngineError>;

    /// Row statistics for the last executed statement.
    fn counts(&mut self) -> Result<CountInfo, EngineError>;

    /// Sets an engine property, returning its resulting value when the engine
    /// reports one.
    fn set_property(&mut self, name: &str, value: &str) -> Result<Option<String>, EngineError>;

    /// The interrupt this session checks.
    fn interrupt(&self) -> &Interrupt;
}
