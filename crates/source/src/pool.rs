//! Cursor pool — a bounded set of decoder cursors with LRU reuse.
//!
//! Each slot holds one cursor with a monotonically increasing last-use
//! stamp. For a target frame the pool prefers the cursor that can reach
//! it by decoding forward the least; when nothing is close enough the
//! least-recently-used slot is sacrificed for a fresh cursor.
//!
//! Slots are arena-indexed: callers take a cursor out by slot id, use it,
//! and put it back, which bumps the stamp.

struct Slot<C> {
    cursor: Option<C>,
    last_use: u64,
}

pub(crate) struct CursorPool<C> {
    slots: Vec<Slot<C>>,
    seq: u64,
}

impl<C> CursorPool<C> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cursor pool capacity must be > 0");
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                cursor: None,
                last_use: 0,
            });
        }
        Self { slots, seq: 0 }
    }

    /// Slot whose cursor is at or before `target` and closest to it,
    /// preferring candidates within `preroll`, then within `max_skip`.
    pub fn best_for(
        &self,
        target: i64,
        preroll: i64,
        max_skip: i64,
        position: impl Fn(&C) -> i64,
    ) -> Option<usize> {
        let best = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let pos = position(s.cursor.as_ref()?);
                let distance = target - pos;
                (distance >= 0).then_some((i, distance))
            })
            .min_by_key(|&(_, d)| d)?;
        let (slot, distance) = best;
        if distance <= preroll || distance <= max_skip {
            Some(slot)
        } else {
            None
        }
    }

    /// Occupied slot with the greatest position that is still at or
    /// before `target` (linear-mode selection).
    pub fn nearest_at_or_before(
        &self,
        target: i64,
        position: impl Fn(&C) -> i64,
    ) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let pos = position(s.cursor.as_ref()?);
                (pos <= target).then_some((i, pos))
            })
            .max_by_key(|&(_, p)| p)
            .map(|(i, _)| i)
    }

    /// Slot to reuse for a fresh cursor: an empty one if any, otherwise
    /// the least-recently-used.
    pub fn lru_slot(&self) -> usize {
        if let Some(empty) = self.slots.iter().position(|s| s.cursor.is_none()) {
            return empty;
        }
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.last_use)
            .map(|(i, _)| i)
            .expect("pool has at least one slot")
    }

    pub fn take(&mut self, slot: usize) -> Option<C> {
        self.slots[slot].cursor.take()
    }

    /// Return a cursor to a slot, stamping it most-recently-used.
    pub fn put(&mut self, slot: usize, cursor: C) {
        self.seq += 1;
        self.slots[slot].cursor = Some(cursor);
        self.slots[slot].last_use = self.seq;
    }

    /// Drop every cursor (used on the transition to linear decoding).
    pub fn drop_all(&mut self) {
        for slot in &mut self.slots {
            slot.cursor = None;
        }
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.cursor.is_some()).count()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
