//! Central error types for the engine (thiserror-based).

use thiserror::Error;

use crate::types::MediaType;

/// Top-level source error.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Open error: {0}")]
    Open(#[from] OpenError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Seek retries exhausted for frame {frame} and linear decode failed")]
    Seek { frame: i64 },

    #[error("Index {index} out of range [0, {len})")]
    OutOfRange { index: i64, len: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while opening a source or selecting a track.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("Failed to open source: {0}")]
    FileOpen(String),

    #[error("No matching track for {selector}")]
    TrackNotFound { selector: String },

    #[error("Track {track} is not an {media} track")]
    WrongMediaType { track: i32, media: MediaType },

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while building a track index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Indexing cancelled by caller")]
    Cancelled,

    #[error("Inconsistent metadata at frame {frame}: {reason}")]
    Inconsistent { frame: i64, reason: String },

    #[error("Decode error during indexing: {0}")]
    Decode(#[from] DecodeError),

    #[error("Open error during indexing: {0}")]
    Open(#[from] OpenError),
}

/// Errors while reading or writing a persisted track index.
///
/// All of these are non-fatal to the caller: a failed read falls back to
/// re-indexing and a failed write leaves the in-memory index intact.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Bad magic, not an index cache file")]
    BadMagic,

    #[error("Unsupported index cache version {found}")]
    UnsupportedVersion { found: u32 },

    #[error("Index cache truncated")]
    Truncated,

    #[error("Index cache checksum mismatch")]
    ChecksumMismatch,

    #[error("Index cache does not match source ({field} differs)")]
    SourceMismatch { field: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoder failures.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// A recoverable per-packet glitch. Cursors retry past these
    /// internally; they never reach the public API.
    #[error("Corrupt packet: {0}")]
    Corrupt(String),

    #[error("Packet read failed: {0}")]
    Read(String),

    #[error("Decode failed at frame {frame}: {reason}")]
    Failed { frame: i64, reason: String },

    #[error("Cannot merge fields: {0}")]
    FieldMismatch(String),
}

/// Convenience Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;
