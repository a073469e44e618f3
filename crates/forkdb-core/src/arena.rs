// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-capacity, index-addressed slot arena.
//!
//! Both the parent's handle cache and a worker's session table are arenas of
//! this kind. A slot holds a key and, while idle, its value. Claiming a slot
//! moves the value out to the claimant; releasing moves it back. Slots are
//! never destroyed individually, only released and possibly recycled for a
//! different key.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How an idle slot is chosen for eviction when no free slot is left.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvictionPolicy {
    /// The idle slot with the lowest index.
    #[default]
    FirstFree,
    /// The idle slot released longest ago.
    LeastRecentlyUsed,
}

/// Outcome of a successful [`SlotArena::claim`].
#[derive(Debug, PartialEq, Eq)]
pub enum Claim<K, V> {
    /// An idle slot already bound to the key; its value is handed over.
    Reused(V),
    /// A never-used (or vacated) slot; the caller creates the value.
    Fresh,
    /// An idle slot bound to another key; the previous key and value are handed
    /// over so the caller can close them before creating a new value.
    Evicted { key: K, value: V },
}

/// Every slot is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaFull {
    pub capacity: usize,
}

#[derive(Debug)]
struct Slot<K, V> {
    key: Option<K>,
    value: Option<V>,
    in_use: bool,
    released_at: u64,
}

impl<K, V> Slot<K, V> {
    fn empty() -> Self {
        Self {
            key: None,
            value: None,
            in_use: false,
            released_at: 0,
        }
    }
}

#[derive(Debug)]
pub struct SlotArena<K, V> {
    slots: Vec<Slot<K, V>>,
    policy: EvictionPolicy,
    tick: u64,
}

impl<K: Eq + Clone, V> SlotArena<K, V> {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::empty);
        Self {
            slots,
            policy,
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }

    /// Claims a slot for `key`.
    ///
    /// Preference order: an idle slot bound to `key`, then an empty slot, then
    /// an idle slot chosen by the eviction policy. Never blocks.
    pub fn claim(&mut self, key: &K) -> Result<(usize, Claim<K, V>), ArenaFull> {
        if let Some(index) = self
            .slots
            .iter()
            .position(|s| !s.in_use && s.value.is_some() && s.key.as_ref() == Some(key))
        {
            let slot = &mut self.slots[index];
            slot.in_use = true;
            if let Some(value) = slot.value.take() {
                return Ok((index, Claim::Reused(value)));
            }
        }

        if let Some(index) = self
            .slots
            .iter()
            .position(|s| !s.in_use && s.value.is_none())
        {
            let slot = &mut self.slots[index];
            slot.in_use = true;
            slot.key = Some(key.clone());
            return Ok((index, Claim::Fresh));
        }

        let victim = match self.policy {
            EvictionPolicy::FirstFree => self.slots.iter().position(|s| !s.in_use),
            EvictionPolicy::LeastRecentlyUsed => self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.in_use)
                .min_by_key(|(_, s)| s.released_at)
                .map(|(i, _)| i),
        };
        let Some(index) = victim else {
            return Err(ArenaFull {
                capacity: self.capacity(),
            });
        };

        let slot = &mut self.slots[index];
        slot.in_use = true;
        let old_key = slot.key.replace(key.clone());
        match (old_key, slot.value.take()) {
            (Some(key), Some(value)) => Ok((index, Claim::Evicted { key, value })),
            _ => Ok((index, Claim::Fresh)),
        }
    }

    /// Returns a claimed slot. `None` vacates it so the key is forgotten.
    pub fn release(&mut self, index: usize, value: Option<V>) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(slot) = self.slots.get_mut(index) {
            slot.in_use = false;
            slot.released_at = tick;
            if value.is_none() {
                slot.key = None;
            }
            slot.value = value;
        }
    }

    pub fn key(&self, index: usize) -> Option<&K> {
        self.slots.get(index).and_then(|s| s.key.as_ref())
    }

    pub fn is_claimed(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|s| s.in_use)
    }

    /// Borrows an idle slot's value.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut V> {
        self.slots.get_mut(index).and_then(|s| s.value.as_mut())
    }

    /// Removes every idle value, leaving claimed slots untouched.
    pub fn drain_idle(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::new();
        for slot in self.slots.iter_mut().filter(|s| !s.in_use) {
            if let (Some(key), Some(value)) = (slot.key.take(), slot.value.take()) {
                out.push((key, value));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(capacity: usize, policy: EvictionPolicy) -> SlotArena<&'static str, u32> {
        SlotArena::new(capacity, policy)
    }

    #[test]
    fn fresh_then_reused_for_same_key() {
        let mut a = arena(2, EvictionPolicy::FirstFree);
        let (i, claim) = a.claim(&"a").expect("claim");
        assert_eq!(claim, Claim::Fresh);
        a.release(i, Some(7));

        let (j, claim) = a.claim(&"a").expect("claim");
        assert_eq!(j, i);
        assert_eq!(claim, Claim::Reused(7));
    }

    #[test]
    fn claimed_key_is_never_handed_out_twice() {
        let mut a = arena(2, EvictionPolicy::FirstFree);
        let (i, _) = a.claim(&"a").expect("claim");
        let (j, claim) = a.claim(&"a").expect("claim");
        assert_ne!(i, j);
        assert_eq!(claim, Claim::Fresh);
        assert_eq!(a.in_use(), 2);
    }

    #[test]
    fn full_arena_reports_capacity() {
        let mut a = arena(1, EvictionPolicy::FirstFree);
        a.claim(&"a").expect("claim");
        assert_eq!(a.claim(&"b"), Err(ArenaFull { capacity: 1 }));
    }

    #[test]
    fn first_free_evicts_lowest_index() {
        let mut a = arena(2, EvictionPolicy::FirstFree);
        let (i, _) = a.claim(&"a").expect("claim");
        let (j, _) = a.claim(&"b").expect("claim");
        a.release(j, Some(2));
        a.release(i, Some(1));

        let (k, claim) = a.claim(&"c").expect("claim");
        assert_eq!(k, 0);
        assert_eq!(
            claim,
            Claim::Evicted {
                key: "a",
                value: 1
            }
        );
        assert_eq!(a.key(k), Some(&"c"));
    }

    #[test]
    fn lru_evicts_oldest_release() {
        let mut a = arena(2, EvictionPolicy::LeastRecentlyUsed);
        let (i, _) = a.claim(&"a").expect("claim");
        let (j, _) = a.claim(&"b").expect("claim");
        a.release(j, Some(2));
        a.release(i, Some(1));

        let (k, claim) = a.claim(&"c").expect("claim");
        assert_eq!(k, j);
        assert_eq!(
            claim,
            Claim::Evicted {
                key: "b",
                value: 2
            }
        );
    }

    #[test]
    fn release_without_value_vacates() {
        let mut a = arena(1, EvictionPolicy::FirstFree);
        let (i, _) = a.claim(&"a").expect("claim");
        a.release(i, None);
        assert_eq!(a.key(i), None);
        let (_, claim) = a.claim(&"b").expect("claim");
        assert_eq!(claim, Claim::Fresh);
    }

    #[test]
    fn drain_idle_skips_claimed_slots() {
        let mut a = arena(3, EvictionPolicy::FirstFree);
        let (i, _) = a.claim(&"a").expect("claim");
        let (_j, _) = a.claim(&"b").expect("claim");
        a.release(i, Some(1));
        assert_eq!(a.drain_idle(), vec![("a", 1)]);
        assert_eq!(a.in_use(), 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn in_use_never_exceeds_capacity(ops in proptest::collection::vec((0u8..4, any::<bool>()), 1..64)) {
                let mut a: SlotArena<u8, u8> = SlotArena::new(3, EvictionPolicy::LeastRecentlyUsed);
                let mut held: Vec<(usize, u8)> = Vec::new();
                for (key, release) in ops {
                    if release && !held.is_empty() {
                        let (index, k) = held.remove(0);
                        a.release(index, Some(k));
                    } else if let Ok((index, _)) = a.claim(&key) {
                        prop_assert!(!held.iter().any(|(i, _)| *i == index));
                        held.push((index, key));
                    } else {
                        prop_assert_eq!(held.len(), 3);
                    }
                    prop_assert_eq!(a.in_use(), held.len());
                }
            }
        }
    }
}
