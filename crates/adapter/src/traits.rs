//! The narrow interface consumed from the demux/codec layer.
//!
//! Everything above this seam is backend-agnostic: substituting another
//! container/codec library only requires implementing these traits. The
//! split mirrors how such libraries work — a demuxer iterates compressed
//! packets, a decoder turns submitted packets into frames, possibly with
//! delay.

use fl_common::error::{DecodeError, OpenError};
use fl_common::frame::{AudioFrame, VideoFrame};
use fl_common::options::SourceDescriptor;
use fl_common::types::Rational;

/// One compressed packet from the selected track.
#[derive(Clone, Debug)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Presentation timestamp in the track's time base.
    pub pts: i64,
    /// Decode timestamp in the track's time base.
    pub dts: i64,
    /// Duration in time-base ticks, 0 when unknown.
    pub duration: i64,
    /// Whether this packet starts an independently decodable frame.
    pub keyframe: bool,
}

/// Container-side iterator over one track's packets.
pub trait Demuxer: Send {
    /// Next packet of the selected track, `None` at end of stream.
    ///
    /// Recoverable read problems are reported as
    /// [`DecodeError::Corrupt`]; the cursor retries past them.
    fn read_packet(&mut self) -> Result<Option<Packet>, DecodeError>;

    /// Seek so that the next packet is at or before `pts`. Returns
    /// whether the container accepted the seek; on `false` the demuxer
    /// position is unspecified.
    fn seek(&mut self, pts: i64) -> bool;

    /// Bytes consumed from the source so far (progress reporting).
    fn position(&self) -> i64;
}

/// Codec-side half of the seam: submit packets, receive frames.
pub trait FrameDecoder: Send {
    type Frame;

    fn submit(&mut self, packet: &Packet) -> Result<(), DecodeError>;

    /// A decoded frame if one is ready, `None` when more input is needed.
    fn receive(&mut self) -> Result<Option<Self::Frame>, DecodeError>;

    /// Drain delayed frames after end of stream, one per call.
    fn flush(&mut self) -> Result<Option<Self::Frame>, DecodeError>;

    /// Discard internal state after a seek.
    fn reset(&mut self);
}

/// Stream-level facts about an opened audio track.
#[derive(Clone, Debug)]
pub struct AudioStreamProps {
    /// Resolved absolute track number.
    pub track: i32,
    pub time_base: Rational,
    pub sample_rate: u32,
    pub channels: u32,
    pub channel_layout: u64,
    /// Container's sample-count estimate, −1 when unknown.
    pub estimated_samples: i64,
    /// Total source size in bytes, −1 when unknown.
    pub source_size: i64,
    /// Identifies the codec parameters for cache validation.
    pub codec_fingerprint: Vec<u8>,
}

/// Stream-level facts about an opened video track.
#[derive(Clone, Debug)]
pub struct VideoStreamProps {
    /// Resolved absolute track number.
    pub track: i32,
    pub time_base: Rational,
    pub fps: Rational,
    pub sar: Rational,
    /// Stream duration in time-base ticks, 0 when unknown.
    pub duration: i64,
    pub width: u32,
    pub height: u32,
    pub stereo3d_type: i32,
    pub stereo3d_flags: i32,
    pub flip_vertical: bool,
    pub flip_horizontal: bool,
    pub rotation: i32,
    /// Total source size in bytes, −1 when unknown.
    pub source_size: i64,
    /// Identifies the codec parameters for cache validation.
    pub codec_fingerprint: Vec<u8>,
}

/// An opened audio track: demuxer, decoder, stream facts.
pub struct AudioTrack {
    pub demuxer: Box<dyn Demuxer>,
    pub decoder: Box<dyn FrameDecoder<Frame = AudioFrame>>,
    pub props: AudioStreamProps,
}

impl std::fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTrack")
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// An opened video track: demuxer, decoder, stream facts.
pub struct VideoTrack {
    pub demuxer: Box<dyn Demuxer>,
    pub decoder: Box<dyn FrameDecoder<Frame = VideoFrame>>,
    pub props: VideoStreamProps,
}

impl std::fmt::Debug for VideoTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoTrack")
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// Factory for opening tracks. Sources keep a handle to respawn decoder
/// cursors whenever the pool evicts one.
pub trait MediaBackend: Send + Sync {
    fn open_audio(&self, desc: &SourceDescriptor) -> Result<AudioTrack, OpenError>;
    fn open_video(&self, desc: &SourceDescriptor) -> Result<VideoTrack, OpenError>;
}
