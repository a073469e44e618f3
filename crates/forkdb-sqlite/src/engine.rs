// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use forkdb_config::ForkdbConfig;
use forkdb_core::{Engine, EngineError, Interrupt};
use rusqlite::Connection;
use tracing::debug;

use crate::session::SqliteSession;

/// SQLite virtual machine steps between two cancellation checks.
const PROGRESS_STEPS: i32 = 1000;

/// Opens SQLite sessions.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    busy_timeout: Duration,
}

impl SqliteEngine {
    pub fn new(busy_timeout: Duration) -> Self {
        Self { busy_timeout }
    }

    pub fn from_config(config: &ForkdbConfig) -> Self {
        Self::new(Duration::from_millis(config.engine.busy_timeout_ms))
    }
}

impl Default for SqliteEngine {
    fn default() -> Self {
        Self::from_config(&ForkdbConfig::default())
    }
}

impl Engine for SqliteEngine {
    type Session = SqliteSession;

    fn name(&self) -> &str {
        "sqlite"
    }

    fn open(&self, path: &str, interrupt: Interrupt) -> Result<SqliteSession, EngineError> {
        let conn = Connection::open(path)
            .map_err(|e| EngineError::failed(format!("unable to open database {path}: {e}")))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| EngineError::failed(e.to_string()))?;

        // Returning true from the handler aborts the running statement.
        let watched = AssertUnwindSafe(interrupt.clone());
        conn.progress_handler(PROGRESS_STEPS, Some(move || watched.is_raised()));

        debug!(path, "sqlite session opened");
        Ok(SqliteSession::new(conn, interrupt))
    }
}
