//! Source descriptor — everything needed to (re)open one track of one
//! container. Immutable for the lifetime of a source; decoder cursors are
//! respawned from it on demand.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::TrackSelector;

/// Description of a single track to open.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    pub track: TrackSelector,
    /// Allow mid-stream format changes instead of failing.
    pub variable_format: bool,
    /// Decoder thread count, 0 = automatic.
    pub threads: u32,
    /// Opaque key/value options forwarded to the demux/codec backend.
    pub decoder_options: BTreeMap<String, String>,
    /// Hardware decode device name (video only), empty = software.
    pub hw_device: Option<String>,
    /// Extra hardware frame pool entries (video only).
    pub extra_hw_frames: u32,
    /// Dynamic range compression scale (audio only), 0.0 = off.
    pub drc_scale: f64,
}

impl SourceDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            track: TrackSelector::default(),
            variable_format: false,
            threads: 0,
            decoder_options: BTreeMap::new(),
            hw_device: None,
            extra_hw_frames: 0,
            drc_scale: 0.0,
        }
    }

    pub fn with_track(mut self, track: TrackSelector) -> Self {
        self.track = track;
        self
    }
}
