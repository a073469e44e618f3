// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative cancellation.
//!
//! Every worker owns a monotonically increasing cancel epoch. Cancelling a
//! worker bumps the epoch. A session remembers the epoch it was opened (or last
//! refreshed) under, and considers itself cancelled while the two differ.
//! For forked workers the epoch lives in the header of the shared buffer so
//! that the parent can raise it without touching the pipes.

use std::any::Any;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// A handle to a worker's cancel epoch.
#[derive(Clone)]
pub struct CancelEpoch {
    counter: NonNull<AtomicU32>,
    // Keeps the memory behind `counter` alive.
    _owner: Arc<dyn Any + Send + Sync>,
}

// SAFETY: `counter` points at an `AtomicU32` kept alive by `_owner`, and all
// access goes through atomic operations.
unsafe impl Send for CancelEpoch {}
unsafe impl Sync for CancelEpoch {}

impl CancelEpoch {
    /// An epoch backed by process-local memory.
    pub fn new() -> Self {
        let owner = Arc::new(AtomicU32::new(0));
        let counter = NonNull::from(owner.as_ref());
        Self {
            counter,
            _owner: owner,
        }
    }

    /// An epoch backed by externally owned memory, such as a shared mapping.
    ///
    /// # Safety
    ///
    /// `counter` must be valid, suitably aligned, and stay mapped for as long
    /// as `owner` is alive.
    pub unsafe fn from_raw(counter: NonNull<AtomicU32>, owner: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            counter,
            _owner: owner,
        }
    }

    fn atomic(&self) -> &AtomicU32 {
        // SAFETY: see the type-level invariant.
        unsafe { self.counter.as_ref() }
    }

    pub fn current(&self) -> u32 {
        self.atomic().load(Ordering::Acquire)
    }

    /// Raises cancellation for every session opened under an earlier epoch.
    pub fn bump(&self) -> u32 {
        self.atomic().fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

impl Default for CancelEpoch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelEpoch")
            .field("current", &self.current())
            .finish()
    }
}

/// The per-session view of a cancel epoch.
///
/// Clones share the remembered epoch, so a clone captured by an engine
/// callback observes [`Interrupt::refresh`].
#[derive(Debug, Clone)]
pub struct Interrupt {
    epoch: CancelEpoch,
    opened: Arc<AtomicU32>,
}

impl Interrupt {
    pub fn new(epoch: CancelEpoch) -> Self {
        let opened = Arc::new(AtomicU32::new(epoch.current()));
        Self { epoch, opened }
    }

    /// An interrupt nothing can raise.
    pub fn never() -> Self {
        Self::new(CancelEpoch::new())
    }

    pub fn is_raised(&self) -> bool {
        self.epoch.current() != self.opened.load(Ordering::Acquire)
    }

    /// Accepts the current epoch; the session is no longer cancelled.
    pub fn refresh(&self) {
        self.opened.store(self.epoch.current(), Ordering::Release);
    }

    pub fn epoch(&self) -> &CancelEpoch {
        &self.epoch
    }
}
