//! Growable arena of probe records.
//!
//! The pool is a bump allocator over a backing `Vec<PooledProbe>`. Records
//! are created when the pool is built or grows and are never freed one at a
//! time: [`ProbePool::deallocate_all`] clears the active view and rewinds the
//! cursor, making every slot reusable for the next sampling cycle. Capacity
//! only ever increases.
//!
//! All operations run inside one spin-lock critical section. Hold time is an
//! index, a write and a push.

use atmos_types::PooledProbe;
use spin::Mutex;

/// Result of [`ProbePool::allocate_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Backing slot that was handed out.
    pub slot: usize,
    /// Whether the backing store had to grow to satisfy the request.
    pub grew: bool,
}

#[derive(Debug)]
struct PoolState {
    backing: Vec<PooledProbe>,
    /// Indices into `backing`, in allocation order.
    active: Vec<usize>,
    cursor: usize,
}

/// Arena of reusable [`PooledProbe`] records.
#[derive(Debug)]
pub struct ProbePool {
    state: Mutex<PoolState>,
    growth: usize,
}

impl ProbePool {
    /// Pool with `capacity` pre-created records that grows by `growth`.
    pub fn new(capacity: usize, growth: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                backing: vec![PooledProbe::default(); capacity],
                active: Vec::new(),
                cursor: 0,
            }),
            growth: growth.max(1),
        }
    }

    /// Hand out the record at the cursor, growing the backing store first if
    /// every record is in use. `fill` writes the record while the lock is
    /// held. The record is appended to the active view.
    pub fn allocate_or_create(&self, fill: impl FnOnce(&mut PooledProbe)) -> Allocation {
        let mut state = self.state.lock();
        let slot = state.cursor;
        let grew = slot >= state.backing.len();
        if grew {
            let len = state.backing.len().saturating_add(self.growth);
            state.backing.resize(len, PooledProbe::default());
        }
        if let Some(probe) = state.backing.get_mut(slot) {
            fill(probe);
        }
        state.cursor = slot.saturating_add(1);
        state.active.push(slot);
        Allocation { slot, grew }
    }

    /// Copy of the active records, in allocation order.
    pub fn active_snapshot(&self) -> Vec<PooledProbe> {
        let state = self.state.lock();
        state
            .active
            .iter()
            .filter_map(|slot| state.backing.get(*slot))
            .copied()
            .collect()
    }

    /// Clear the active view and rewind the cursor to slot 0.
    pub fn deallocate_all(&self) {
        let mut state = self.state.lock();
        state.active.clear();
        state.cursor = 0;
    }

    /// Record stored in `slot`.
    pub fn get(&self, slot: usize) -> Option<PooledProbe> {
        self.state.lock().backing.get(slot).copied()
    }

    /// Current backing capacity.
    pub fn capacity(&self) -> usize {
        self.state.lock().backing.len()
    }

    /// Number of active records.
    pub fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::sync::Arc;

    use atmos_types::{Color, DVec3};

    use super::*;

    #[test]
    fn no_growth_within_capacity() {
        let pool = ProbePool::new(16, 10);
        for i in 0..16 {
            let a = pool.allocate_or_create(|_| {});
            assert_eq!(a.slot, i);
            assert!(!a.grew);
        }
        assert_eq!(pool.active_len(), 16);
        assert_eq!(pool.capacity(), 16);
    }

    #[test]
    fn growth_adds_whole_steps() {
        let initial = 5;
        let growth = 10;
        let n = 27;
        let pool = ProbePool::new(initial, growth);
        let grew = (0..n)
            .map(|_| pool.allocate_or_create(|_| {}))
            .filter(|a| a.grew)
            .count();
        // ceil((27 - 5) / 10) = 3 growth steps.
        assert_eq!(grew, 3);
        assert_eq!(pool.capacity(), initial + 3 * growth);
        assert_eq!(pool.active_len(), n);
    }

    #[test]
    fn reset_reuses_slot_zero_and_keeps_capacity() {
        let pool = ProbePool::new(2, 4);
        for _ in 0..3 {
            pool.allocate_or_create(|_| {});
        }
        assert_eq!(pool.capacity(), 6);

        pool.deallocate_all();
        assert_eq!(pool.active_len(), 0);
        assert!(pool.active_snapshot().is_empty());

        let a = pool.allocate_or_create(|_| {});
        assert_eq!(a.slot, 0);
        assert!(!a.grew);
        assert_eq!(pool.capacity(), 6);
    }

    #[test]
    fn fill_writes_the_record() {
        let pool = ProbePool::new(1, 1);
        let a = pool.allocate_or_create(|p| {
            p.start = DVec3::new(1.0, 2.0, 3.0);
            p.length = 1.25;
            p.color = Color::GREEN;
        });
        let stored = pool.get(a.slot).unwrap();
        assert_eq!(stored.length, 1.25);
        assert_eq!(pool.active_snapshot(), vec![stored]);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let pool = ProbePool::new(4, 4);
        pool.allocate_or_create(|p| p.length = 1.0);
        let snapshot = pool.active_snapshot();
        pool.deallocate_all();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn concurrent_allocation_hands_out_distinct_slots() {
        let pool = Arc::new(ProbePool::new(8, 8));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| pool.allocate_or_create(|_| {}).slot)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut slots: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), 200);
        assert_eq!(pool.active_len(), 200);
    }
}
