//! `fl-common` — Shared types and errors for the framelock media source
//! engine.
//!
//! This crate is the foundation that the other engine crates depend on.
//! It defines:
//!
//! - **Types**: `Rational`, `TrackSelector`, `MediaType`, the `NO_PTS`
//!   sentinel
//! - **Frames**: `AudioFrame`, `VideoFrame` decoded-frame structs and the
//!   `DecodedFrame` trait the cache is generic over
//! - **Properties**: `AudioProperties`, `VideoProperties`
//! - **Hashing**: the 128-bit per-frame `ContentHash`
//! - **Options**: `SourceDescriptor` (path, track selector, decoder
//!   options, hardware decode knobs)
//! - **Errors**: `SourceError` and its per-domain enums (thiserror-based)
//! - **Progress**: cancellable progress callback types

pub mod error;
pub mod frame;
pub mod hash;
pub mod options;
pub mod progress;
pub mod properties;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CacheError, DecodeError, IndexError, OpenError, SourceError, SourceResult};
pub use frame::{
    AudioFrame, ColorFamily, Colorimetry, ContentLightLevel, DecodedFrame, MasteringDisplay,
    SampleFormat, VideoFormat, VideoFrame,
};
pub use hash::{ContentHash, HASH_PREFIX_LEN};
pub use options::SourceDescriptor;
pub use progress::{Progress, ProgressControl, ProgressReport};
pub use properties::{AudioProperties, VideoProperties};
pub use types::{MediaType, Rational, TrackSelector, NO_PTS};
