//! RFF (repeat-first-field) expansion.
//!
//! Telecined streams flag frames with `repeat_pict`, asking the display
//! to show a field an extra time. Expanding those flags turns the frame
//! stream into a longer display sequence where some display frames take
//! their top and bottom fields from two different source frames.
//!
//! The expansion is precomputed once per track: every source frame
//! contributes `2 + repeat_pict` fields, alternating parity from its
//! first field (`tff`), and consecutive field pairs become display
//! frames.

use fl_index::types::VideoTrackIndex;

/// One display frame: which source frame supplies each field, and which
/// source frame came first in stream order (used for timestamps).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct RffPair {
    pub top: i64,
    pub bottom: i64,
    pub first: i64,
}

impl RffPair {
    /// Both fields come from the same source frame.
    pub fn is_whole(&self) -> bool {
        self.top == self.bottom
    }
}

/// Lazily initialized per-track expansion state.
pub(crate) enum RffState {
    Uninitialized,
    /// Track carries no repeat flags; display index == frame index.
    Unused,
    Ready(Vec<RffPair>),
}

/// Number of display frames after RFF expansion: total fields, halved
/// and rounded up.
pub(crate) fn rff_frame_count(index: &VideoTrackIndex) -> i64 {
    let fields: i64 = index
        .frames
        .iter()
        .map(|f| 2 + f.repeat_pict.max(0) as i64)
        .sum();
    (fields + 1) / 2
}

/// Build the display-frame → field-pair map, or `Unused` when the track
/// has no repeat flags.
pub(crate) fn build_field_map(index: &VideoTrackIndex) -> RffState {
    if index.frames.iter().all(|f| f.repeat_pict <= 0) {
        return RffState::Unused;
    }

    struct Field {
        src: i64,
        top: bool,
    }

    let mut fields = Vec::new();
    for (i, f) in index.frames.iter().enumerate() {
        let count = 2 + f.repeat_pict.max(0) as i64;
        let mut is_top = f.tff;
        for _ in 0..count {
            fields.push(Field {
                src: i as i64,
                top: is_top,
            });
            is_top = !is_top;
        }
    }

    let mut pairs = Vec::with_capacity((fields.len() + 1) / 2);
    for chunk in fields.chunks(2) {
        let pair = match chunk {
            [a, b] => {
                if a.top == b.top {
                    // Same-parity fields cannot form one picture; show
                    // the earlier source frame whole.
                    RffPair {
                        top: a.src,
                        bottom: a.src,
                        first: a.src,
                    }
                } else if a.top {
                    RffPair {
                        top: a.src,
                        bottom: b.src,
                        first: a.src,
                    }
                } else {
                    RffPair {
                        top: b.src,
                        bottom: a.src,
                        first: a.src,
                    }
                }
            }
            [a] => RffPair {
                top: a.src,
                bottom: a.src,
                first: a.src,
            },
            _ => unreachable!("chunks of 2"),
        };
        pairs.push(pair);
    }
    RffState::Ready(pairs)
}

// ── Tests ────────────────────────────────────────────────────────────
