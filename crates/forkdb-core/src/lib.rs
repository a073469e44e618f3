// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for forkdb.
//!
//! This crate provides the engine traits, error types, cancellation primitives
//! and common types used throughout the forkdb workspace. Engine backends
//! implement the traits defined here.

pub mod arena;
pub mod cancel;
pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use arena::{ArenaFull, Claim, EvictionPolicy, SlotArena};
pub use cancel::{CancelEpoch, Interrupt};
pub use error::{EngineError, ErrorKind, ForkDbError};
pub use traits::{Engine, Session};
pub use types::{
    Column, ColumnType, CountInfo, InputType, Parameter, ResultSet, Settings, SqlType, WorkerId,
};
