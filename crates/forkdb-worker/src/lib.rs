// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker processes for forkdb.
//!
//! The [`WorkerSupervisor`] forks one child per worker id. Each child runs a
//! [`CommandLoop`] that owns a private [`SessionTable`] of engine sessions
//! and answers requests arriving on its channel.

pub mod command_loop;
pub mod sessions;
pub mod spawn;
pub mod supervisor;

pub use command_loop::{CommandLoop, LoopExit};
pub use sessions::SessionTable;
pub use supervisor::{SupervisorOptions, WorkerLink, WorkerProcess, WorkerSupervisor};
