//! Backends implementing the demux/decode seam.
//!
//! - [`symphonia`] — real audio demuxing/decoding via the Symphonia
//!   probe/format-reader/decoder stack.
//! - [`synthetic`] — deterministic in-memory streams for tests, with
//!   configurable seek pathologies.

pub mod symphonia;
pub mod synthetic;

pub use self::symphonia::SymphoniaBackend;
pub use self::synthetic::{SeekBehavior, SyntheticAudio, SyntheticBackend, SyntheticVideo};
