//! Decoded-frame cache — a byte-bounded LRU keyed by frame number.
//!
//! Frames are admitted as reference-counted handles; a hit hands out a
//! clone of the handle and promotes the entry to most-recently-used.
//! After every insertion the least-recently-used entries are dropped
//! until the byte budget holds again. A single frame larger than the
//! whole budget is retained alone. A budget of zero disables caching.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use fl_common::frame::DecodedFrame;

/// Cache usage counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached frames.
    pub entries: usize,
    /// Total decoded bytes currently held.
    pub size_bytes: usize,
    /// Byte budget.
    pub max_size: usize,
}

struct CacheBlock<F> {
    frame_number: i64,
    frame: Arc<F>,
    size: usize,
}

/// Byte-bounded LRU of decoded frames. Front of the deque is LRU, back
/// is MRU.
pub(crate) struct FrameCache<F> {
    blocks: VecDeque<CacheBlock<F>>,
    size: usize,
    max_size: usize,
}

impl<F: DecodedFrame> FrameCache<F> {
    pub fn new(max_size: usize) -> Self {
        Self {
            blocks: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.size = 0;
    }

    pub fn set_max_size(&mut self, bytes: usize) {
        self.max_size = bytes;
        self.apply_max_size();
    }

    /// Insert a frame, replacing any entry with the same number, then
    /// evict until the budget holds.
    pub fn cache_frame(&mut self, frame_number: i64, frame: Arc<F>) {
        if self.max_size == 0 {
            return;
        }
        if let Some(pos) = self
            .blocks
            .iter()
            .position(|b| b.frame_number == frame_number)
        {
            let old = self.blocks.remove(pos).expect("position exists");
            self.size -= old.size;
        }
        let size = frame.byte_size();
        self.blocks.push_back(CacheBlock {
            frame_number,
            frame,
            size,
        });
        self.size += size;
        self.apply_max_size();
    }

    /// Look up a frame and promote it to most-recently-used.
    pub fn get(&mut self, frame_number: i64) -> Option<Arc<F>> {
        let pos = self
            .blocks
            .iter()
            .position(|b| b.frame_number == frame_number)?;
        let block = self.blocks.remove(pos).expect("position exists");
        let frame = block.frame.clone();
        self.blocks.push_back(block);
        Some(frame)
    }

    pub fn size_bytes(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.blocks.len(),
            size_bytes: self.size_bytes(),
            max_size: self.max_size,
        }
    }

    fn apply_max_size(&mut self) {
        if self.max_size == 0 {
            self.clear();
            return;
        }
        // A single oversized frame may remain; everything else goes.
        while self.size > self.max_size && self.blocks.len() > 1 {
            if let Some(lru) = self.blocks.pop_front() {
                trace!(frame = lru.frame_number, bytes = lru.size, "Evicting cached frame");
                self.size -= lru.size;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
