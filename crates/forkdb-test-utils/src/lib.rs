// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for forkdb integration tests.
//!
//! Provides a scripted engine and fixture databases for fast, deterministic
//! tests.
//!
//! # Components
//!
//! - [`MockEngine`] - Engine whose statements are registered up front
//! - [`Fixture`] - Temporary SQLite database with a known table `T`

pub mod fixtures;
pub mod mock_engine;

pub use fixtures::{FIXTURE_COLUMNS, FIXTURE_ROWS, Fixture};
pub use mock_engine::{MockEngine, MockSession, blob_column, int_column, text_column};
