// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One child process and one channel per worker id.
//!
//! Workers are created on first use and checked with a non-blocking
//! `waitpid` every time they are ensured. A dead worker, or one whose channel
//! broke mid-exchange, is replaced by a fresh process that reuses the same
//! shared mappings. Each respawn gets a new generation number, so session
//! indices issued by the previous process are never sent to the new one.
//!
//! Lock order: the worker map lock is only held to look up or insert an
//! entry; the per-worker lock covers liveness checks, respawn and exchanges.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::time::Duration;

use forkdb_config::ForkdbConfig;
use forkdb_core::{CancelEpoch, Engine, EvictionPolicy, ForkDbError, WorkerId};
use forkdb_wire::{Channel, ChannelParts, ErrorBuffer, SharedBuffer};

use crate::spawn::{ChildOptions, spawn_worker};

/// Supervisor settings, usually taken from [`ForkdbConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub shared_buffer_bytes: usize,
    pub error_buffer_bytes: usize,
    pub request_timeout: Option<Duration>,
    pub process_title: String,
    pub session_capacity: usize,
    pub eviction: EvictionPolicy,
}

impl SupervisorOptions {
    pub fn from_config(config: &ForkdbConfig) -> Self {
        let timeout_ms = config.worker.request_timeout_ms;
        Self {
            shared_buffer_bytes: config.worker.shared_buffer_bytes,
            error_buffer_bytes: config.worker.error_buffer_bytes,
            request_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            process_title: config.worker.process_title.clone(),
            session_capacity: config.cache.capacity,
            eviction: config.cache.eviction,
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_config(&ForkdbConfig::default())
    }
}

/// A live worker process and the parent's side of its channel.
#[derive(Debug)]
pub struct WorkerProcess {
    pid: libc::pid_t,
    generation: u64,
    channel: Channel,
}

impl WorkerProcess {
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn channel(&mut self) -> &mut Channel {
        &mut self.channel
    }

    /// Non-blocking liveness check; reaps the child if it has exited.
    fn is_alive(&self) -> bool {
        let mut status = 0;
        // SAFETY: WNOHANG never blocks; `status` is a valid out pointer.
        let rc = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        rc == 0
    }

    /// Sends `signal` if the child is still running, then reaps it.
    fn stop(self, signal: libc::c_int) {
        if self.is_alive() {
            // SAFETY: `pid` is our unreaped child.
            unsafe {
                libc::kill(self.pid, signal);
                let mut status = 0;
                libc::waitpid(self.pid, &mut status, 0);
            }
        }
    }
}

type Slot = Arc<Mutex<Option<WorkerProcess>>>;

/// Session indices to close on the worker's next exchange, tagged with the
/// generation that issued them.
type Deferred = Arc<Mutex<Vec<(u64, i32)>>>;

struct EntryRefs {
    slot: Slot,
    shm: SharedBuffer,
    errors: ErrorBuffer,
    pid: Arc<AtomicI32>,
    deferred: Deferred,
}

struct WorkerEntry {
    slot: Slot,
    shm: SharedBuffer,
    errors: ErrorBuffer,
    epoch: CancelEpoch,
    pid: Arc<AtomicI32>,
    deferred: Deferred,
}

impl WorkerEntry {
    fn refs(&self) -> EntryRefs {
        EntryRefs {
            slot: self.slot.clone(),
            shm: self.shm.clone(),
            errors: self.errors.clone(),
            pid: self.pid.clone(),
            deferred: self.deferred.clone(),
        }
    }
}

/// A worker ensured live at a given generation.
#[derive(Clone)]
pub struct WorkerLink {
    worker: WorkerId,
    generation: u64,
    slot: Slot,
    deferred: Deferred,
}

impl WorkerLink {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Runs `f` against the channel if the worker has not been respawned
    /// since this link was issued.
    pub fn call<T>(
        &self,
        f: impl FnOnce(&mut Channel) -> Result<T, ForkDbError>,
    ) -> Result<T, ForkDbError> {
        let mut guard = lock(&self.slot)?;
        self.exchange(&mut guard, f)
    }

    /// Like [`call`](Self::call), but returns `Ok(None)` instead of waiting
    /// while another thread is exchanging with the worker.
    pub fn try_call<T>(
        &self,
        f: impl FnOnce(&mut Channel) -> Result<T, ForkDbError>,
    ) -> Result<Option<T>, ForkDbError> {
        let mut guard = match self.slot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Poisoned(_)) => {
                return Err(ForkDbError::Internal("worker lock poisoned".to_string()));
            }
        };
        self.exchange(&mut guard, f).map(Some)
    }

    /// Closes session `index` now if the worker is idle, otherwise queues the
    /// close for the next exchange with this generation. Never blocks on the
    /// worker's channel.
    pub fn close_or_defer(&self, index: i32) -> Result<(), ForkDbError> {
        match self.try_call(|ch| ch.close(index))? {
            Some(()) => Ok(()),
            None => {
                lock(&self.deferred)?.push((self.generation, index));
                tracing::debug!(worker = self.worker, index, "worker busy; close deferred");
                Ok(())
            }
        }
    }

    fn exchange<T>(
        &self,
        slot: &mut Option<WorkerProcess>,
        f: impl FnOnce(&mut Channel) -> Result<T, ForkDbError>,
    ) -> Result<T, ForkDbError> {
        match slot.as_mut() {
            Some(process) if process.generation == self.generation => {
                let result = self
                    .drain_deferred(process)
                    .and_then(|()| f(&mut process.channel));
                if let Err(ForkDbError::Timeout { duration, .. }) = &result {
                    tracing::warn!(worker = self.worker, pid = process.pid, ?duration, "worker timed out; killing");
                    // SAFETY: `pid` is our unreaped child; it is reaped on the next ensure.
                    unsafe { libc::kill(process.pid, libc::SIGKILL) };
                }
                result
            }
            _ => Err(ForkDbError::Channel {
                worker: self.worker,
                message: "worker was restarted".to_string(),
                source: None,
            }),
        }
    }

    /// Sends the closes queued for `process`; entries from older generations
    /// are dropped.
    fn drain_deferred(&self, process: &mut WorkerProcess) -> Result<(), ForkDbError> {
        let pending = std::mem::take(&mut *lock(&self.deferred)?);
        for (generation, index) in pending {
            if generation != process.generation {
                continue;
            }
            if let Err(err) = process.channel.close(index) {
                if process.channel.is_broken() {
                    return Err(err);
                }
                tracing::debug!(worker = self.worker, index, error = %err, "deferred close failed");
            }
        }
        Ok(())
    }
}

thread_local! {
    static TEARDOWN: RefCell<ThreadTeardown> = RefCell::new(ThreadTeardown::default());
}

/// Terminates the workers spawned by a thread when that thread exits.
#[derive(Default)]
struct ThreadTeardown {
    slots: Vec<(Weak<Mutex<Option<WorkerProcess>>>, Weak<AtomicI32>)>,
}

impl Drop for ThreadTeardown {
    fn drop(&mut self) {
        for (slot, pid) in self.slots.drain(..) {
            let Some(slot) = slot.upgrade() else { continue };
            if let Ok(mut guard) = slot.lock()
                && let Some(process) = guard.take()
            {
                if let Some(pid) = pid.upgrade() {
                    let _ =
                        pid.compare_exchange(process.pid, 0, Ordering::Relaxed, Ordering::Relaxed);
                }
                process.stop(libc::SIGTERM);
            }
        }
    }
}

fn register_teardown(slot: &Slot, pid: &Arc<AtomicI32>) {
    let weak = Arc::downgrade(slot);
    // Fails only while the thread is already tearing down.
    let _ = TEARDOWN.try_with(|t| {
        let mut t = t.borrow_mut();
        t.slots.retain(|(s, _)| s.strong_count() > 0 && !s.ptr_eq(&weak));
        t.slots.push((weak, Arc::downgrade(pid)));
    });
}

pub struct WorkerSupervisor<E: Engine> {
    engine: Arc<E>,
    options: SupervisorOptions,
    workers: Mutex<HashMap<WorkerId, WorkerEntry>>,
    generations: AtomicU64,
}

impl<E: Engine> WorkerSupervisor<E> {
    pub fn new(engine: Arc<E>, options: SupervisorOptions) -> Self {
        forkdb_wire::ignore_sigpipe();
        Self {
            engine,
            options,
            workers: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Looks up or creates the entry for `worker`, mapping its buffers once.
    fn entry(&self, worker: WorkerId) -> Result<EntryRefs, ForkDbError> {
        let mut workers = lock(&self.workers)?;
        if let Some(e) = workers.get(&worker) {
            return Ok(e.refs());
        }
        let shm = SharedBuffer::new(self.options.shared_buffer_bytes)
            .map_err(|e| e.into_fork_error(worker))?;
        let errors = ErrorBuffer::new(self.options.error_buffer_bytes)
            .map_err(|e| e.into_fork_error(worker))?;
        let epoch = shm.cancel_epoch().map_err(|e| e.into_fork_error(worker))?;
        let entry = WorkerEntry {
            slot: Arc::new(Mutex::new(None)),
            shm: shm.clone(),
            errors: errors.clone(),
            epoch,
            pid: Arc::new(AtomicI32::new(0)),
            deferred: Arc::new(Mutex::new(Vec::new())),
        };
        let out = entry.refs();
        workers.insert(worker, entry);
        Ok(out)
    }

    /// Returns a live worker, spawning or respawning it as needed.
    pub fn ensure(&self, worker: WorkerId) -> Result<WorkerLink, ForkDbError> {
        let EntryRefs {
            slot,
            shm,
            errors,
            pid: pid_cell,
            deferred,
        } = self.entry(worker)?;
        let mut guard = lock(&slot)?;

        let healthy = guard
            .as_ref()
            .is_some_and(|p| !p.channel.is_broken() && p.is_alive());
        if !healthy {
            if let Some(old) = guard.take() {
                tracing::warn!(
                    worker,
                    pid = old.pid,
                    generation = old.generation,
                    broken = old.channel.is_broken(),
                    "worker process lost; respawning"
                );
                old.stop(libc::SIGKILL);
            }
            let parts =
                ChannelParts::with_mappings(shm, errors).map_err(|e| e.into_fork_error(worker))?;
            let child = ChildOptions {
                process_title: self.options.process_title.clone(),
                session_capacity: self.options.session_capacity,
                eviction: self.options.eviction,
            };
            let spawned = spawn_worker(self.engine.as_ref(), worker, parts, &child)?;
            let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
            let mut channel = spawned.channel;
            channel.set_timeout(self.options.request_timeout);
            pid_cell.store(spawned.pid, Ordering::Relaxed);
            tracing::info!(worker, pid = spawned.pid, generation, "spawned worker process");
            *guard = Some(WorkerProcess {
                pid: spawned.pid,
                generation,
                channel,
            });
            register_teardown(&slot, &pid_cell);
        }

        let generation = guard.as_ref().map_or(0, |p| p.generation);
        drop(guard);
        Ok(WorkerLink {
            worker,
            generation,
            slot,
            deferred,
        })
    }

    /// Raises cancellation for every session of `worker`. Never blocks on the
    /// worker's channel.
    pub fn cancel(&self, worker: WorkerId) -> Result<bool, ForkDbError> {
        let workers = lock(&self.workers)?;
        match workers.get(&worker) {
            Some(entry) => {
                let epoch = entry.epoch.bump();
                tracing::debug!(worker, epoch, "cancel requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pid of the worker's current process, if one was spawned.
    pub fn child_pid(&self, worker: WorkerId) -> Option<libc::pid_t> {
        let workers = self.workers.lock().ok()?;
        let pid = workers.get(&worker)?.pid.load(Ordering::Relaxed);
        (pid > 0).then_some(pid)
    }

    /// Stops the worker's process with SIGTERM and reaps it.
    pub fn terminate(&self, worker: WorkerId) -> Result<(), ForkDbError> {
        let slot = {
            let workers = lock(&self.workers)?;
            match workers.get(&worker) {
                Some(entry) => {
                    entry.pid.store(0, Ordering::Relaxed);
                    entry.slot.clone()
                }
                None => return Ok(()),
            }
        };
        let process = lock(&slot)?.take();
        if let Some(process) = process {
            tracing::info!(worker, pid = process.pid, "terminating worker process");
            process.stop(libc::SIGTERM);
        }
        Ok(())
    }

    /// Terminates every worker.
    pub fn shutdown(&self) {
        let ids: Vec<WorkerId> = match self.workers.lock() {
            Ok(workers) => workers.keys().copied().collect(),
            Err(_) => return,
        };
        for worker in ids {
            if let Err(err) = self.terminate(worker) {
                tracing::warn!(worker, error = %err, "failed to terminate worker");
            }
        }
    }
}

impl<E: Engine> Drop for WorkerSupervisor<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, ForkDbError> {
    m.lock()
        .map_err(|_| ForkDbError::Internal("worker lock poisoned".to_string()))
}
