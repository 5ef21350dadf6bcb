//! `fl-adapter` — Demux/decode adapter for the framelock engine.
//!
//! This crate is the only place that touches a container/codec library.
//! It defines:
//!
//! - [`traits`] — the narrow consumed interface: `Demuxer` (packet
//!   iteration + seek), `FrameDecoder` (submit/receive), `MediaBackend`
//!   (track factory)
//! - [`cursor`] — `AudioCursor`/`VideoCursor`, one independent decode
//!   position each, with per-packet glitch retry and post-seek state
//! - [`backend`] — a Symphonia-backed audio backend and a deterministic
//!   synthetic backend for tests
//!
//! Everything above this crate is backend-agnostic.

pub mod backend;
pub mod cursor;
pub mod traits;

pub use backend::{SeekBehavior, SymphoniaBackend, SyntheticAudio, SyntheticBackend, SyntheticVideo};
pub use cursor::{AudioCursor, VideoCursor};
pub use traits::{
    AudioStreamProps, AudioTrack, Demuxer, FrameDecoder, MediaBackend, Packet, VideoStreamProps,
    VideoTrack,
};
