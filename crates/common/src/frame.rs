//! Decoded frame types — output of a decoder cursor, unit of caching.
//!
//! Both media types carry their presentation timestamp and enough format
//! metadata to be interpreted without consulting the source again. Video
//! frames additionally keep the colorimetric and HDR side data that
//! downstream consumers need for correct display.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::hash::ContentHash;
use crate::types::Rational;

/// A decoded frame that can live in the byte-bounded frame cache.
pub trait DecodedFrame {
    /// Decoded payload size in bytes (what the cache budget counts).
    fn byte_size(&self) -> usize;

    /// 128-bit content hash used for frame-identity resolution.
    fn content_hash(&self) -> ContentHash;

    /// Presentation timestamp in the track's time base.
    fn pts(&self) -> i64;
}

// ── Audio ────────────────────────────────────────────────────────────

/// Shape of one decoded audio sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFormat {
    pub is_float: bool,
    pub bytes_per_sample: u32,
    pub bits_per_sample: u32,
}

impl SampleFormat {
    pub const F32: Self = Self {
        is_float: true,
        bytes_per_sample: 4,
        bits_per_sample: 32,
    };
    pub const S16: Self = Self {
        is_float: false,
        bytes_per_sample: 2,
        bits_per_sample: 16,
    };
    pub const S32: Self = Self {
        is_float: false,
        bytes_per_sample: 4,
        bits_per_sample: 32,
    };
}

/// One codec packet's worth of decoded audio samples.
///
/// `planes` holds either a single interleaved buffer or one buffer per
/// channel, preserving the decoder's native layout. No sample conversion
/// is ever applied.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Interleaved when `planes.len() == 1`, per-channel otherwise.
    pub planes: Vec<Vec<u8>>,
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u32,
    pub channel_layout: u64,
    pub pts: i64,
    pub num_samples: i64,
}

impl AudioFrame {
    pub fn is_planar(&self) -> bool {
        self.planes.len() > 1
    }
}

impl DecodedFrame for AudioFrame {
    fn byte_size(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }

    fn content_hash(&self) -> ContentHash {
        ContentHash::compute(self.planes.iter().map(Vec::as_slice))
    }

    fn pts(&self) -> i64 {
        self.pts
    }
}

// ── Video ────────────────────────────────────────────────────────────

/// Color family of a pixel format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFamily {
    Unknown,
    Gray,
    Rgb,
    Yuv,
}

/// Pixel format description: family, depth, and chroma subsampling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub color_family: ColorFamily,
    pub alpha: bool,
    pub float: bool,
    pub bits: u32,
    /// log2 horizontal chroma subsampling (1 for 4:2:0 and 4:2:2).
    pub sub_sampling_w: u32,
    /// log2 vertical chroma subsampling (1 for 4:2:0).
    pub sub_sampling_h: u32,
}

impl VideoFormat {
    /// Number of planes for this format, alpha included.
    pub fn plane_count(&self) -> usize {
        let base = match self.color_family {
            ColorFamily::Gray => 1,
            ColorFamily::Rgb | ColorFamily::Yuv => 3,
            ColorFamily::Unknown => 1,
        };
        base + usize::from(self.alpha)
    }

    /// Dimensions of plane `p` for a `width` x `height` frame.
    pub fn plane_dimensions(&self, p: usize, width: u32, height: u32) -> (u32, u32) {
        let chroma = self.color_family == ColorFamily::Yuv && (p == 1 || p == 2);
        if chroma {
            (width >> self.sub_sampling_w, height >> self.sub_sampling_h)
        } else {
            (width, height)
        }
    }
}

/// Basic colorimetry tags, numeric values as the container reports them.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colorimetry {
    pub matrix: i32,
    pub primaries: i32,
    pub transfer: i32,
    pub chroma_location: i32,
    pub color_range: i32,
}

/// Mastering display metadata (SMPTE ST 2086).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteringDisplay {
    pub primaries: [[Rational; 2]; 3],
    pub white_point: [Rational; 2],
    pub min_luminance: Rational,
    pub max_luminance: Rational,
}

/// Content light level metadata (CTA-861.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLightLevel {
    pub max: u32,
    pub average: u32,
}

/// One decoded picture with its side data.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// One buffer per plane, `strides[p] * plane_height(p)` bytes each.
    pub planes: Vec<Vec<u8>>,
    /// Row stride per plane, in bytes.
    pub strides: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,

    pub pts: i64,
    pub duration: i64,

    pub colorimetry: Colorimetry,
    pub interlaced: bool,
    pub tff: bool,
    pub pict_type: char,
    pub key_frame: bool,
    pub repeat_pict: i32,

    pub mastering_display: Option<MasteringDisplay>,
    pub content_light: Option<ContentLightLevel>,
    pub dolby_vision_rpu: Option<Vec<u8>>,
    pub hdr10_plus: Option<Vec<u8>>,
    pub icc_profile: Option<Vec<u8>>,
}

impl VideoFrame {
    /// Height in rows of plane `p`.
    pub fn plane_height(&self, p: usize) -> u32 {
        self.format.plane_dimensions(p, self.width, self.height).1
    }

    /// Overwrite one field of this frame with the same field from `src`,
    /// keeping all other rows and every property of `self`.
    ///
    /// `top` selects the top field (even rows). The frames must agree in
    /// dimensions, format, and strides.
    pub fn merge_field(&mut self, top: bool, src: &VideoFrame) -> Result<(), DecodeError> {
        if self.width != src.width || self.height != src.height {
            return Err(DecodeError::FieldMismatch(format!(
                "dimension mismatch: {}x{} vs {}x{}",
                self.width, self.height, src.width, src.height
            )));
        }
        if self.format != src.format || self.strides != src.strides {
            return Err(DecodeError::FieldMismatch(
                "format or stride mismatch".into(),
            ));
        }

        let first_row = usize::from(!top);
        for p in 0..self.planes.len() {
            let stride = self.strides[p];
            let rows = self.plane_height(p) as usize;
            let (dst, srcp) = (&mut self.planes[p], &src.planes[p]);
            for row in (first_row..rows).step_by(2) {
                let off = row * stride;
                dst[off..off + stride].copy_from_slice(&srcp[off..off + stride]);
            }
        }
        Ok(())
    }
}

impl DecodedFrame for VideoFrame {
    fn byte_size(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }

    fn content_hash(&self) -> ContentHash {
        ContentHash::compute(self.planes.iter().map(Vec::as_slice))
    }

    fn pts(&self) -> i64 {
        self.pts
    }
}

// ── Tests ────────────────────────────────────────────────────────────
