// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The bounded handle cache.
//!
//! A handle is an engine session for one `(path, worker)` pair. The in-process
//! worker holds its session directly; every other worker holds the index of a
//! session living in its child process. Handles are claimed through a
//! [`SlotArena`]: the arena lock covers the scan and claim only, never an
//! engine call or an exchange with a worker.
//!
//! After a failed or cancelled remote call the child has already released the
//! session, so the handle forgets its index without sending `close` and opens
//! again on next use. Only eviction sends `close`, and never waits for a busy
//! worker: the close is queued and goes out with that worker's next request.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use forkdb_config::ForkdbConfig;
use forkdb_config::model::WorkerConfig;
use forkdb_core::{
    CancelEpoch, Claim, CountInfo, Engine, EngineError, ForkDbError, Interrupt, Parameter,
    ResultSet, Session, Settings, SlotArena, WorkerId,
};
use forkdb_wire::Channel;
use forkdb_worker::{SupervisorOptions, WorkerLink, WorkerSupervisor};
use tracing::{debug, warn};

/// Identity of a cached handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleKey {
    pub path: String,
    pub worker: WorkerId,
}

enum Backend<S> {
    Local {
        session: S,
        /// Set after a failed call; the session is refreshed before next use.
        stale: bool,
        applied: Option<u64>,
    },
    Remote {
        link: WorkerLink,
        index: Option<i32>,
        applied: Option<u64>,
    },
}

impl<S> Backend<S> {
    fn applied(&self) -> Option<u64> {
        match self {
            Backend::Local { applied, .. } | Backend::Remote { applied, .. } => *applied,
        }
    }

    fn set_applied(&mut self, fingerprint: u64) {
        match self {
            Backend::Local { applied, .. } | Backend::Remote { applied, .. } => {
                *applied = Some(fingerprint)
            }
        }
    }

    fn is_ready(&self) -> bool {
        match self {
            Backend::Local { stale, .. } => !*stale,
            Backend::Remote { index, .. } => index.is_some(),
        }
    }
}

pub struct HandleCache<E: Engine> {
    engine: Arc<E>,
    supervisor: WorkerSupervisor<E>,
    workers: WorkerConfig,
    local_epoch: CancelEpoch,
    arena: Mutex<SlotArena<HandleKey, Backend<E::Session>>>,
}

impl<E: Engine> HandleCache<E> {
    pub fn new(engine: Arc<E>, config: &ForkdbConfig) -> Self {
        let supervisor =
            WorkerSupervisor::new(Arc::clone(&engine), SupervisorOptions::from_config(config));
        Self {
            engine,
            supervisor,
            workers: config.worker.clone(),
            local_epoch: CancelEpoch::new(),
            arena: Mutex::new(SlotArena::new(config.cache.capacity, config.cache.eviction)),
        }
    }

    pub fn supervisor(&self) -> &WorkerSupervisor<E> {
        &self.supervisor
    }

    pub fn needs_fork(&self, worker: WorkerId) -> bool {
        self.workers.needs_fork(worker)
    }

    pub fn capacity(&self) -> usize {
        self.arena.lock().map(|a| a.capacity()).unwrap_or(0)
    }

    pub fn in_use(&self) -> usize {
        self.arena.lock().map(|a| a.in_use()).unwrap_or(0)
    }

    /// Claims the handle for `(path, worker)`, opening or recycling a session.
    ///
    /// Fails with [`ForkDbError::CacheExhausted`] when every slot is in use.
    pub fn acquire(&self, path: &str, worker: WorkerId) -> Result<Handle<'_, E>, ForkDbError> {
        let key = HandleKey {
            path: path.to_string(),
            worker,
        };
        let (slot, claim) = {
            let mut arena = lock(&self.arena)?;
            let busy = (0..arena.capacity())
                .any(|i| arena.is_claimed(i) && arena.key(i) == Some(&key));
            if busy {
                return Err(ForkDbError::Internal(format!(
                    "handle for {path} on worker {worker} is already in use"
                )));
            }
            arena
                .claim(&key)
                .map_err(|full| ForkDbError::CacheExhausted {
                    capacity: full.capacity,
                })?
        };

        let backend = match claim {
            Claim::Reused(backend) => Some(backend),
            Claim::Fresh => None,
            Claim::Evicted { key: old, value } => {
                self.close_evicted(&old, value);
                None
            }
        };
        let mut handle = Handle {
            cache: self,
            slot,
            key,
            backend,
        };
        handle.connect()?;
        Ok(handle)
    }

    /// Raises cancellation for every session of `worker`.
    ///
    /// Returns false when `worker` never had a process to cancel.
    pub fn cancel(&self, worker: WorkerId) -> Result<bool, ForkDbError> {
        if self.needs_fork(worker) {
            self.supervisor.cancel(worker)
        } else {
            let epoch = self.local_epoch.bump();
            debug!(worker, epoch, "cancel requested for in-process worker");
            Ok(true)
        }
    }

    fn close_evicted(&self, key: &HandleKey, backend: Backend<E::Session>) {
        debug!(path = %key.path, worker = key.worker, "evicting cached handle");
        match backend {
            Backend::Local { session, .. } => drop(session),
            Backend::Remote {
                link,
                index: Some(index),
                ..
            } => {
                if let Err(err) = link.close_or_defer(index) {
                    debug!(path = %key.path, worker = key.worker, error = %err, "evicted session was not closed");
                }
            }
            Backend::Remote { index: None, .. } => {}
        }
    }

    fn release(&self, slot: usize, backend: Option<Backend<E::Session>>) {
        match self.arena.lock() {
            Ok(mut arena) => arena.release(slot, backend),
            Err(_) => warn!(slot, "handle cache lock poisoned; slot not released"),
        }
    }
}

/// A claimed handle. Dropping it returns the slot to the cache.
pub struct Handle<'c, E: Engine> {
    cache: &'c HandleCache<E>,
    slot: usize,
    key: HandleKey,
    backend: Option<Backend<E::Session>>,
}

impl<E: Engine> Handle<'_, E> {
    pub fn path(&self) -> &str {
        &self.key.path
    }

    pub fn worker(&self) -> WorkerId {
        self.key.worker
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Whether the session lives in a worker process.
    pub fn is_remote(&self) -> bool {
        matches!(self.backend, Some(Backend::Remote { .. }))
    }

    /// Worker-local session index of a remote handle.
    pub fn remote_index(&self) -> Option<i32> {
        match &self.backend {
            Some(Backend::Remote { index, .. }) => *index,
            _ => None,
        }
    }

    /// Makes the backend usable: opens a session, reopens a forgotten remote
    /// index, or refreshes a stale local session.
    fn connect(&mut self) -> Result<(), ForkDbError> {
        let cache = self.cache;
        let worker = self.key.worker;

        if !cache.needs_fork(worker) {
            if let Some(Backend::Local { session, stale, .. }) = &mut self.backend {
                if *stale {
                    refresh(session).map_err(|e| local_error(e, worker))?;
                    *stale = false;
                }
                return Ok(());
            }
            let interrupt = Interrupt::new(cache.local_epoch.clone());
            let session = cache
                .engine
                .open(&self.key.path, interrupt)
                .map_err(|e| local_error(e, worker))?;
            debug!(path = %self.key.path, worker, slot = self.slot, "opened in-process session");
            self.backend = Some(Backend::Local {
                session,
                stale: false,
                applied: None,
            });
            return Ok(());
        }

        let link = cache.supervisor.ensure(worker)?;
        let (index, applied) = match self.backend.take() {
            Some(Backend::Remote {
                link: old,
                index,
                applied,
            }) if old.generation() == link.generation() => (index, applied),
            _ => (None, None),
        };
        let (index, applied) = match index {
            Some(index) => (index, applied),
            None => match link.call(|ch| ch.open(&self.key.path)) {
                Ok(index) => {
                    debug!(path = %self.key.path, worker, slot = self.slot, index, "opened remote session");
                    (index, None)
                }
                Err(err) => {
                    self.backend = Some(Backend::Remote {
                        link,
                        index: None,
                        applied: None,
                    });
                    return Err(err);
                }
            },
        };
        self.backend = Some(Backend::Remote {
            link,
            index: Some(index),
            applied,
        });
        Ok(())
    }

    fn ensure_connected(&mut self) -> Result<(), ForkDbError> {
        match &self.backend {
            Some(backend) if backend.is_ready() => Ok(()),
            _ => self.connect(),
        }
    }

    /// Runs one session call on whichever side the session lives.
    fn run<T>(
        &mut self,
        local: impl FnOnce(&mut E::Session) -> Result<T, EngineError>,
        remote: impl FnOnce(&mut Channel, i32) -> Result<T, ForkDbError>,
    ) -> Result<T, ForkDbError> {
        self.ensure_connected()?;
        let worker = self.key.worker;
        match &mut self.backend {
            Some(Backend::Local { session, stale, .. }) => {
                let result = if session.interrupt().is_raised() {
                    Err(EngineError::Interrupted)
                } else {
                    local(session)
                };
                result.map_err(|e| {
                    *stale = true;
                    local_error(e, worker)
                })
            }
            Some(Backend::Remote {
                link,
                index,
                applied,
            }) => {
                let Some(idx) = *index else {
                    return Err(ForkDbError::Internal("remote session is not open".to_string()));
                };
                let result = link.call(|ch| remote(ch, idx));
                if result.is_err() {
                    *index = None;
                    *applied = None;
                }
                result
            }
            None => Err(ForkDbError::Internal("handle has no session".to_string())),
        }
    }

    pub fn prepare(&mut self, sql: &str) -> Result<(), ForkDbError> {
        self.run(|s| s.prepare(sql), |ch, i| ch.prepare(i, sql))
    }

    pub fn bind(&mut self, param: &Parameter) -> Result<(), ForkDbError> {
        self.run(|s| s.bind(param), |ch, i| ch.bind(i, param))
    }

    pub fn reset_params(&mut self) -> Result<(), ForkDbError> {
        self.run(|s| s.reset_params(), |ch, i| ch.reset_params(i))
    }

    pub fn execute(&mut self) -> Result<(), ForkDbError> {
        self.run(|s| s.execute(), |ch, i| ch.execute(i))
    }

    pub fn fetch(&mut self) -> Result<Option<ResultSet>, ForkDbError> {
        self.run(|s| s.fetch(), |ch, i| ch.fetch(i))
    }

    pub fn skip(&mut self, rows: i32) -> Result<(), ForkDbError> {
        self.run(|s| s.skip(rows), |ch, i| ch.skip(i, rows))
    }

    pub fn flush(&mut self) -> Result<(), ForkDbError> {
        self.run(|s| s.flush(), |ch, i| ch.flush(i))
    }

    pub fn counts(&mut self) -> Result<CountInfo, ForkDbError> {
        self.run(|s| s.counts(), |ch, i| ch.counts(i))
    }

    pub fn set_property(&mut self, name: &str, value: &str) -> Result<Option<String>, ForkDbError> {
        self.run(
            |s| s.set_property(name, value),
            |ch, i| ch.set_property(i, name, value),
        )
    }

    /// Applies `settings` unless this session already has exactly them.
    ///
    /// Returns the value the engine reported for each property set; empty
    /// when nothing had to be applied.
    pub fn apply(
        &mut self,
        settings: &Settings,
    ) -> Result<BTreeMap<String, Option<String>>, ForkDbError> {
        self.ensure_connected()?;
        let fingerprint = settings.fingerprint();
        if self.backend.as_ref().and_then(Backend::applied) == Some(fingerprint) {
            return Ok(BTreeMap::new());
        }
        let mut reported = BTreeMap::new();
        for (name, value) in settings.iter() {
            let returned = self.set_property(name, value)?;
            reported.insert(name.to_string(), returned);
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.set_applied(fingerprint);
        }
        debug!(path = %self.key.path, worker = self.key.worker, count = reported.len(), "applied settings");
        Ok(reported)
    }
}

impl<E: Engine> Drop for Handle<'_, E> {
    fn drop(&mut self) {
        self.cache.release(self.slot, self.backend.take());
    }
}

/// Makes an idle in-process session look freshly opened.
fn refresh<S: Session>(session: &mut S) -> Result<(), EngineError> {
    session.interrupt().refresh();
    session.flush()?;
    session.reset_params()
}

fn local_error(err: EngineError, worker: WorkerId) -> ForkDbError {
    match err {
        EngineError::Failed(message) => ForkDbError::Engine { message },
        EngineError::Interrupted => ForkDbError::Cancelled { worker },
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, ForkDbError> {
    m.lock()
        .map_err(|_| ForkDbError::Internal("handle cache lock poisoned".to_string()))
}
