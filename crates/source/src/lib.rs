//! `fl-source` — Frame-accurate random-access media sources.
//!
//! The top crate of the framelock engine: given a backend implementing
//! the demux/decode seam, [`AudioSource`] and [`VideoSource`] turn one
//! container track into a deterministic, randomly-addressable sequence
//! of decoded frames keyed by integer frame index. The same index always
//! returns the same content, regardless of request order.
//!
//! Internals, one module per concern:
//!
//! - `pool` — bounded decoder-cursor pool with LRU reuse
//! - `cache` — byte-bounded LRU of decoded frames
//! - `engine` — the seek/retry state machine with blacklisting and the
//!   permanent linear-mode fallback
//! - `rff` — repeat-first-field expansion for telecined video
//! - `timemap` — time ↔ frame mapping and timecode export
//!
//! Audio additionally exposes sample-domain reads (packed and planar)
//! with zero-fill outside the stream.

mod audio;
mod cache;
mod engine;
mod pool;
mod rff;
mod timemap;
mod video;

pub use audio::{AudioSource, FrameRange};
pub use cache::CacheStats;
pub use video::VideoSource;

/// Decoder cursors kept per source.
pub const MAX_CURSORS: usize = 4;
/// Failed seek targets tolerated before the permanent switch to linear
/// decoding.
pub const RETRY_SEEK_ATTEMPTS: usize = 10;
/// Frames decoded through before an audio target to guarantee correct
/// output after a seek.
pub const DEFAULT_PREROLL_AUDIO: i64 = 40;
/// Frames decoded through before a video target to guarantee correct
/// output after a seek.
pub const DEFAULT_PREROLL_VIDEO: i64 = 20;
/// Decoded-frame cache budget.
pub const DEFAULT_MAX_CACHE_BYTES: usize = 1 << 30;
/// How far ahead of a pooled cursor a target may be before seeking wins
/// over decoding forward.
pub const DEFAULT_MAX_SKIP_AHEAD: i64 = 4096;
