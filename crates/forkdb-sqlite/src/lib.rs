// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite engine for forkdb.
//!
//! Implements the `Engine` and `Session` traits from `forkdb-core` on top of
//! `rusqlite`. Each session owns one connection and one prepared statement,
//! stepped one [`ResultSet`](forkdb_core::ResultSet) per fetch.

pub mod convert;
mod cursor;
pub mod engine;
pub mod session;

pub use engine::SqliteEngine;
pub use session::SqliteSession;
