//! Track-level properties reported after opening (and refined after
//! indexing completes).

use serde::{Deserialize, Serialize};

use crate::frame::{ContentLightLevel, MasteringDisplay, SampleFormat, VideoFormat};
use crate::types::Rational;

/// Properties of an opened audio track.
///
/// `num_frames` and `num_samples` are estimates (or −1) until the track
/// index has been built, after which both are exact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioProperties {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u32,
    pub channel_layout: u64,
    /// −1 while unknown.
    pub num_frames: i64,
    /// Estimated by the decoder until indexing completes.
    pub num_samples: i64,
    /// Start of the track in seconds.
    pub start_time: f64,
}

/// Properties of an opened video track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoProperties {
    pub time_base: Rational,
    /// Start of the track in seconds.
    pub start_time: f64,
    pub duration: i64,
    /// −1 while unknown. RFF ignored.
    pub num_frames: i64,
    /// −1 while unknown. RFF applied.
    pub num_rff_frames: i64,

    pub fps: Rational,
    pub sar: Rational,

    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    /// Largest size that is a multiple of the subsampling.
    pub ss_mod_width: u32,
    pub ss_mod_height: u32,

    pub field_based: bool,
    pub tff: bool,

    pub stereo3d_type: i32,
    pub stereo3d_flags: i32,

    pub mastering_display: Option<MasteringDisplay>,
    pub content_light: Option<ContentLightLevel>,

    pub flip_vertical: bool,
    pub flip_horizontal: bool,
    /// Positive number in degrees.
    pub rotation: i32,
}

impl VideoProperties {
    /// Recompute the subsampling-aligned dimensions from the current
    /// width, height, and format.
    pub fn apply_ss_mod(&mut self) {
        let wmask = (1u32 << self.format.sub_sampling_w) - 1;
        let hmask = (1u32 << self.format.sub_sampling_h) - 1;
        self.ss_mod_width = self.width & !wmask;
        self.ss_mod_height = self.height & !hmask;
    }
}
