//! `fl-index` — Track indexing and persisted index I/O for the framelock
//! engine.
//!
//! - [`types`] — per-frame records and the audio/video track indexes
//! - [`indexer`] — the single full pass that builds an index from a
//!   fresh decoder cursor, with progress and cancellation
//! - [`persist`] — the versioned sidecar cache format with source
//!   identity pinning and CRC validation

pub mod indexer;
pub mod persist;
pub mod types;

pub use indexer::{index_audio_track, index_video_track};
pub use persist::{
    default_cache_path, read_audio_index, read_video_index, source_mtime, write_audio_index,
    write_video_index, CacheIdentity, INDEX_MAGIC, INDEX_VERSION,
};
pub use types::{AudioFrameInfo, AudioTrackIndex, VideoFrameInfo, VideoTrackIndex};
