// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker-local session table.
//!
//! Indices handed to the parent are slot indices. Closing a session only
//! releases its slot: the session stays open and is handed back, refreshed,
//! to the next open of the same path.

use forkdb_core::{
    CancelEpoch, Claim, Engine, EngineError, EvictionPolicy, Interrupt, Session, SlotArena,
};

pub struct SessionTable<E: Engine> {
    arena: SlotArena<String, E::Session>,
    active: Vec<Option<E::Session>>,
    epoch: CancelEpoch,
}

impl<E: Engine> SessionTable<E> {
    pub fn new(capacity: usize, policy: EvictionPolicy, epoch: CancelEpoch) -> Self {
        let mut active = Vec::with_capacity(capacity);
        active.resize_with(capacity, || None);
        Self {
            arena: SlotArena::new(capacity, policy),
            active,
            epoch,
        }
    }

    /// Opens a session for `path`, reusing an idle one when possible.
    pub fn open(&mut self, engine: &E, path: &str) -> Result<i32, EngineError> {
        let (index, claim) = self.arena.claim(&path.to_string()).map_err(|full| {
            EngineError::failed(format!(
                "worker session table is full ({} sessions)",
                full.capacity
            ))
        })?;

        let opened = match claim {
            Claim::Reused(mut session) => refresh(&mut session).map(|()| session),
            Claim::Fresh => engine.open(path, Interrupt::new(self.epoch.clone())),
            Claim::Evicted { key, value } => {
                tracing::debug!(slot = index, evicted = %key, path, "recycling worker session");
                drop(value);
                engine.open(path, Interrupt::new(self.epoch.clone()))
            }
        };

        match opened {
            Ok(session) => {
                self.active[index] = Some(session);
                Ok(index as i32)
            }
            Err(err) => {
                self.arena.release(index, None);
                Err(err)
            }
        }
    }

    pub fn get(&mut self, index: i32) -> Option<&mut E::Session> {
        let index = usize::try_from(index).ok()?;
        self.active.get_mut(index).and_then(Option::as_mut)
    }

    /// Returns the session to the idle pool. False if `index` is not open.
    pub fn release(&mut self, index: i32) -> bool {
        let Ok(slot) = usize::try_from(index) else {
            return false;
        };
        match self.active.get_mut(slot).and_then(Option::take) {
            Some(session) => {
                self.arena.release(slot, Some(session));
                true
            }
            None => false,
        }
    }

    pub fn open_count(&self) -> usize {
        self.active.iter().filter(|s| s.is_some()).count()
    }
}

/// Makes an idle session look freshly opened.
fn refresh<S: Session>(session: &mut S) -> Result<(), EngineError> {
    session.interrupt().refresh();
    session.flush()?;
    session.reset_params()
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkdb_test_utils::MockEngine;

    fn table(capacity: usize) -> (SessionTable<MockEngine>, CancelEpoch) {
        let epoch = CancelEpoch::new();
        (
            SessionTable::new(capacity, EvictionPolicy::FirstFree, epoch.clone()),
            epoch,
        )
    }

    #[test]
    fn closed_session_is_reused_for_same_path() {
        let engine = MockEngine::new();
        let (mut t, _) = table(2);
        let a = t.open(&engine, "/db/a").expect("open");
        assert!(t.release(a));
        let again = t.open(&engine, "/db/a").expect("open");
        assert_eq!(a, again);
        assert_eq!(engine.opened(), 1);
    }

    #[test]
    fn unknown_index_is_rejected() {
        let (mut t, _) = table(2);
        assert!(t.get(0).is_none());
        assert!(t.get(-1).is_none());
        assert!(t.get(99).is_none());
        assert!(!t.release(1));
    }

    #[test]
    fn full_table_reports_failure() {
        let engine = MockEngine::new();
        let (mut t, _) = table(1);
        t.open(&engine, "/db/a").expect("open");
        let err = t.open(&engine, "/db/b").expect_err("full");
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn idle_session_is_evicted_for_another_path() {
        let engine = MockEngine::new();
        let (mut t, _) = table(1);
        let a = t.open(&engine, "/db/a").expect("open");
        t.release(a);
        let b = t.open(&engine, "/db/b").expect("open");
        assert_eq!(a, b);
        assert_eq!(engine.opened(), 2);
    }

    #[test]
    fn reopening_clears_cancellation() {
        let engine = MockEngine::new();
        let (mut t, epoch) = table(1);
        let a = t.open(&engine, "/db/a").expect("open");
        epoch.bump();
        assert!(t.get(a).expect("open").interrupt().is_raised());

        t.release(a);
        let a = t.open(&engine, "/db/a").expect("open");
        assert!(!t.get(a).expect("open").interrupt().is_raised());
    }

    #[test]
    fn failed_open_vacates_the_slot() {
        let engine = MockEngine::new();
        engine.fail_open("/db/missing");
        let (mut t, _) = table(1);
        assert!(t.open(&engine, "/db/missing").is_err());
        assert_eq!(t.open_count(), 0);
        t.open(&engine, "/db/a").expect("slot is free again");
    }
}
