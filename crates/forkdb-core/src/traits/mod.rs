// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions at the boundary between forkdb and a database engine.
//!
//! The handle cache calls these either directly, for the single worker allowed
//! to use the engine in-process, or through a worker process's command loop.

pub mod engine;

pub use engine::{Engine, Session};
