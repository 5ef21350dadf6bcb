//! Deterministic in-memory backend.
//!
//! Produces streams whose decoded content is a pure function of the frame
//! index, so content hashes and byte comparisons are stable across runs
//! and processes. Seek behavior is configurable, including several broken
//! modes that real containers exhibit, which makes the seek/retry paths
//! reproducible under test.

use std::collections::BTreeSet;
use std::sync::Arc;

use fl_common::error::{DecodeError, OpenError};
use fl_common::frame::{
    AudioFrame, ColorFamily, Colorimetry, SampleFormat, VideoFormat, VideoFrame,
};
use fl_common::options::SourceDescriptor;
use fl_common::types::{Rational, TrackSelector};

use crate::traits::{
    AudioStreamProps, AudioTrack, Demuxer, FrameDecoder, MediaBackend, Packet, VideoStreamProps,
    VideoTrack,
};

/// Nominal compressed-packet size, used for byte positions and progress.
const PACKET_BYTES: i64 = 64;

/// How a synthetic track responds to seek requests.
#[derive(Clone, Debug, Default)]
pub enum SeekBehavior {
    /// Lands exactly on the requested sync point.
    #[default]
    Exact,
    /// Lands the given number of frames before the target.
    LandsShort(i64),
    /// Lands the given number of frames past the target.
    Overshoots(i64),
    /// The listed sync frames land far past the target; others are exact.
    BrokenAt(BTreeSet<i64>),
    /// Every seek request is refused.
    Refused,
}

impl SeekBehavior {
    fn apply(&self, target: i64, last: i64) -> Option<i64> {
        let landed = match self {
            SeekBehavior::Exact => target,
            SeekBehavior::LandsShort(n) => target - n,
            SeekBehavior::Overshoots(n) => target + n,
            SeekBehavior::BrokenAt(set) => {
                if set.contains(&target) {
                    target + 1000
                } else {
                    target
                }
            }
            SeekBehavior::Refused => return None,
        };
        Some(landed.clamp(0, last))
    }
}

/// Description of one synthetic audio track.
#[derive(Clone, Debug)]
pub struct SyntheticAudio {
    pub frames: i64,
    pub sample_rate: u32,
    pub channels: u32,
    pub format: SampleFormat,
    /// Per-frame sample counts, cycled. Must be non-empty.
    pub frame_lengths: Vec<i64>,
    /// PTS of the first frame, in 1/sample_rate ticks.
    pub first_pts: i64,
    pub seek: SeekBehavior,
    /// Content salt so multiple tracks produce different samples.
    pub salt: u64,
}

impl SyntheticAudio {
    pub fn new(frames: i64) -> Self {
        Self {
            frames,
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::F32,
            frame_lengths: vec![1024],
            first_pts: 0,
            seek: SeekBehavior::Exact,
            salt: 0,
        }
    }

    pub fn with_frame_lengths(mut self, lengths: Vec<i64>) -> Self {
        assert!(!lengths.is_empty(), "frame_lengths must be non-empty");
        self.frame_lengths = lengths;
        self
    }

    pub fn with_seek(mut self, seek: SeekBehavior) -> Self {
        self.seek = seek;
        self
    }

    pub fn with_salt(mut self, salt: u64) -> Self {
        self.salt = salt;
        self
    }

    pub fn with_first_pts(mut self, pts: i64) -> Self {
        self.first_pts = pts;
        self
    }
}

/// Description of one synthetic video track.
#[derive(Clone, Debug)]
pub struct SyntheticVideo {
    pub frames: i64,
    pub width: u32,
    pub height: u32,
    /// Keyframe cadence: frame `i` is a keyframe when `i % gop == 0`.
    pub gop: i64,
    pub time_base: Rational,
    pub fps: Rational,
    /// PTS increment per frame, in time-base ticks.
    pub pts_step: i64,
    /// Per-frame repeat_pict values, cycled. `[0]` = no pulldown.
    pub repeat_pict: Vec<i32>,
    pub tff: bool,
    pub seek: SeekBehavior,
    pub salt: u64,
}

impl SyntheticVideo {
    pub fn new(frames: i64) -> Self {
        Self {
            frames,
            width: 64,
            height: 48,
            gop: 4,
            time_base: Rational::new(1, 30000),
            fps: Rational::FPS_29_97,
            pts_step: 1001,
            repeat_pict: vec![0],
            tff: true,
            seek: SeekBehavior::Exact,
            salt: 0,
        }
    }

    pub fn with_gop(mut self, gop: i64) -> Self {
        assert!(gop > 0, "gop must be > 0");
        self.gop = gop;
        self
    }

    pub fn with_repeat_pict(mut self, pattern: Vec<i32>) -> Self {
        assert!(!pattern.is_empty(), "repeat_pict pattern must be non-empty");
        self.repeat_pict = pattern;
        self
    }

    pub fn with_seek(mut self, seek: SeekBehavior) -> Self {
        self.seek = seek;
        self
    }

    pub fn with_salt(mut self, salt: u64) -> Self {
        self.salt = salt;
        self
    }
}

/// In-memory backend holding any number of video and audio tracks.
///
/// Absolute track numbers enumerate video tracks first, then audio
/// tracks, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct SyntheticBackend {
    pub video: Vec<SyntheticVideo>,
    pub audio: Vec<SyntheticAudio>,
}

impl SyntheticBackend {
    pub fn with_audio(mut self, track: SyntheticAudio) -> Self {
        self.audio.push(track);
        self
    }

    pub fn with_video(mut self, track: SyntheticVideo) -> Self {
        self.video.push(track);
        self
    }

    fn resolve_audio(&self, selector: TrackSelector) -> Result<(i32, usize), OpenError> {
        match selector {
            TrackSelector::Absolute(t) => {
                let t_us = usize::try_from(t).map_err(|_| OpenError::TrackNotFound {
                    selector: selector.to_string(),
                })?;
                if t_us < self.video.len() {
                    return Err(OpenError::WrongMediaType {
                        track: t,
                        media: fl_common::types::MediaType::Audio,
                    });
                }
                let idx = t_us - self.video.len();
                if idx >= self.audio.len() {
                    return Err(OpenError::TrackNotFound {
                        selector: selector.to_string(),
                    });
                }
                Ok((t, idx))
            }
            TrackSelector::NthOfType(n) => {
                let idx = n as usize;
                if idx >= self.audio.len() {
                    return Err(OpenError::TrackNotFound {
                        selector: selector.to_string(),
                    });
                }
                Ok(((self.video.len() + idx) as i32, idx))
            }
        }
    }

    fn resolve_video(&self, selector: TrackSelector) -> Result<(i32, usize), OpenError> {
        match selector {
            TrackSelector::Absolute(t) => {
                let t_us = usize::try_from(t).map_err(|_| OpenError::TrackNotFound {
                    selector: selector.to_string(),
                })?;
                if t_us >= self.video.len() {
                    return Err(if t_us < self.video.len() + self.audio.len() {
                        OpenError::WrongMediaType {
                            track: t,
                            media: fl_common::types::MediaType::Video,
                        }
                    } else {
                        OpenError::TrackNotFound {
                            selector: selector.to_string(),
                        }
                    });
                }
                Ok((t, t_us))
            }
            TrackSelector::NthOfType(n) => {
                let idx = n as usize;
                if idx >= self.video.len() {
                    return Err(OpenError::TrackNotFound {
                        selector: selector.to_string(),
                    });
                }
                Ok((idx as i32, idx))
            }
        }
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_audio(&self, desc: &SourceDescriptor) -> Result<AudioTrack, OpenError> {
        let (abs, idx) = self.resolve_audio(desc.track)?;
        let model = Arc::new(AudioModel::new(self.audio[idx].clone()));
        let props = AudioStreamProps {
            track: abs,
            time_base: Rational::new(1, model.spec.sample_rate),
            sample_rate: model.spec.sample_rate,
            channels: model.spec.channels,
            channel_layout: (1u64 << model.spec.channels) - 1,
            estimated_samples: model.total_samples(),
            source_size: model.spec.frames * PACKET_BYTES,
            codec_fingerprint: format!(
                "synthetic-audio:{}:{}:{}:{}",
                model.spec.sample_rate,
                model.spec.channels,
                model.spec.format.bits_per_sample,
                model.spec.format.is_float,
            )
            .into_bytes(),
        };
        Ok(AudioTrack {
            demuxer: Box::new(SynthAudioDemuxer {
                model: model.clone(),
                next: 0,
            }),
            decoder: Box::new(SynthAudioDecoder {
                model,
                pending: None,
            }),
            props,
        })
    }

    fn open_video(&self, desc: &SourceDescriptor) -> Result<VideoTrack, OpenError> {
        let (abs, idx) = self.resolve_video(desc.track)?;
        let model = Arc::new(VideoModel {
            spec: self.video[idx].clone(),
        });
        let props = VideoStreamProps {
            track: abs,
            time_base: model.spec.time_base,
            fps: model.spec.fps,
            sar: Rational::new(1, 1),
            duration: model.spec.frames * model.spec.pts_step,
            width: model.spec.width,
            height: model.spec.height,
            stereo3d_type: 0,
            stereo3d_flags: 0,
            flip_vertical: false,
            flip_horizontal: false,
            rotation: 0,
            source_size: model.spec.frames * PACKET_BYTES,
            codec_fingerprint: format!(
                "synthetic-video:{}x{}:{}",
                model.spec.width, model.spec.height, model.spec.gop,
            )
            .into_bytes(),
        };
        Ok(VideoTrack {
            demuxer: Box::new(SynthVideoDemuxer {
                model: model.clone(),
                next: 0,
            }),
            decoder: Box::new(SynthVideoDecoder {
                model,
                pending: None,
            }),
            props,
        })
    }
}

// ── Audio track machinery ────────────────────────────────────────────

struct AudioModel {
    spec: SyntheticAudio,
    /// Sample position of each frame, plus one trailing total entry.
    starts: Vec<i64>,
}

impl AudioModel {
    fn new(spec: SyntheticAudio) -> Self {
        let mut starts = Vec::with_capacity(spec.frames as usize + 1);
        let mut acc = 0i64;
        for i in 0..spec.frames {
            starts.push(acc);
            acc += spec.frame_lengths[(i % spec.frame_lengths.len() as i64) as usize];
        }
        starts.push(acc);
        Self { spec, starts }
    }

    fn total_samples(&self) -> i64 {
        *self.starts.last().unwrap_or(&0)
    }

    fn length(&self, i: i64) -> i64 {
        self.starts[i as usize + 1] - self.starts[i as usize]
    }

    fn pts(&self, i: i64) -> i64 {
        self.spec.first_pts + self.starts[i as usize]
    }

    fn frame_for_pts(&self, pts: i64) -> i64 {
        let rel = (pts - self.spec.first_pts).max(0);
        match self.starts[..self.spec.frames as usize].binary_search(&rel) {
            Ok(i) => i as i64,
            Err(0) => 0,
            Err(i) => i as i64 - 1,
        }
    }
}

struct SynthAudioDemuxer {
    model: Arc<AudioModel>,
    next: i64,
}

impl Demuxer for SynthAudioDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        if self.next >= self.model.spec.frames {
            return Ok(None);
        }
        let i = self.next;
        self.next += 1;
        Ok(Some(Packet {
            data: i.to_le_bytes().to_vec(),
            pts: self.model.pts(i),
            dts: self.model.pts(i),
            duration: self.model.length(i),
            keyframe: true,
        }))
    }

    fn seek(&mut self, pts: i64) -> bool {
        let target = self.model.frame_for_pts(pts);
        match self
            .model
            .spec
            .seek
            .apply(target, self.model.spec.frames - 1)
        {
            Some(landed) => {
                self.next = landed;
                true
            }
            None => false,
        }
    }

    fn position(&self) -> i64 {
        self.next * PACKET_BYTES
    }
}

struct SynthAudioDecoder {
    model: Arc<AudioModel>,
    pending: Option<i64>,
}

impl FrameDecoder for SynthAudioDecoder {
    type Frame = AudioFrame;

    fn submit(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        let bytes: [u8; 8] = packet
            .data
            .get(..8)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| DecodeError::Corrupt("short synthetic packet".into()))?;
        self.pending = Some(i64::from_le_bytes(bytes));
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<AudioFrame>, DecodeError> {
        let Some(i) = self.pending.take() else {
            return Ok(None);
        };
        let spec = &self.model.spec;
        let len = self.model.length(i);
        let mut buf =
            vec![0u8; (len * spec.channels as i64 * spec.format.bytes_per_sample as i64) as usize];
        fill_deterministic(&mut buf, spec.salt ^ mix(0xA0D1_0000 + i as u64));
        Ok(Some(AudioFrame {
            planes: vec![buf],
            format: spec.format,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            channel_layout: (1u64 << spec.channels) - 1,
            pts: self.model.pts(i),
            num_samples: len,
        }))
    }

    fn flush(&mut self) -> Result<Option<AudioFrame>, DecodeError> {
        Ok(None)
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}

// ── Video track machinery ────────────────────────────────────────────

struct VideoModel {
    spec: SyntheticVideo,
}

impl VideoModel {
    fn pts(&self, i: i64) -> i64 {
        i * self.spec.pts_step
    }

    fn is_keyframe(&self, i: i64) -> bool {
        i % self.spec.gop == 0
    }

    fn repeat(&self, i: i64) -> i32 {
        self.spec.repeat_pict[(i % self.spec.repeat_pict.len() as i64) as usize]
    }

    /// Field parity continues across frames: every odd repeat count flips
    /// which field the next frame leads with, as real telecined streams
    /// flag it.
    fn tff(&self, i: i64) -> bool {
        if self.spec.repeat_pict.iter().all(|&r| r <= 0) {
            return self.spec.tff;
        }
        let flips: i64 = (0..i).map(|j| self.repeat(j).max(0) as i64).sum();
        self.spec.tff ^ (flips % 2 == 1)
    }
}

struct SynthVideoDemuxer {
    model: Arc<VideoModel>,
    next: i64,
}

impl Demuxer for SynthVideoDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        if self.next >= self.model.spec.frames {
            return Ok(None);
        }
        let i = self.next;
        self.next += 1;
        Ok(Some(Packet {
            data: i.to_le_bytes().to_vec(),
            pts: self.model.pts(i),
            dts: self.model.pts(i),
            duration: self.model.spec.pts_step,
            keyframe: self.model.is_keyframe(i),
        }))
    }

    fn seek(&mut self, pts: i64) -> bool {
        let spec = &self.model.spec;
        let raw = (pts / spec.pts_step).clamp(0, spec.frames - 1);
        // Containers land on a sync point at or before the request.
        let target = raw - raw % spec.gop;
        match spec.seek.apply(target, spec.frames - 1) {
            Some(landed) => {
                self.next = landed;
                true
            }
            None => false,
        }
    }

    fn position(&self) -> i64 {
        self.next * PACKET_BYTES
    }
}

struct SynthVideoDecoder {
    model: Arc<VideoModel>,
    pending: Option<i64>,
}

impl FrameDecoder for SynthVideoDecoder {
    type Frame = VideoFrame;

    fn submit(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        let bytes: [u8; 8] = packet
            .data
            .get(..8)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| DecodeError::Corrupt("short synthetic packet".into()))?;
        self.pending = Some(i64::from_le_bytes(bytes));
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        let Some(i) = self.pending.take() else {
            return Ok(None);
        };
        let spec = &self.model.spec;
        let format = VideoFormat {
            color_family: ColorFamily::Yuv,
            alpha: false,
            float: false,
            bits: 8,
            sub_sampling_w: 1,
            sub_sampling_h: 1,
        };
        let mut planes = Vec::with_capacity(3);
        let mut strides = Vec::with_capacity(3);
        for p in 0..format.plane_count() {
            let (w, h) = format.plane_dimensions(p, spec.width, spec.height);
            let mut buf = vec![0u8; (w * h) as usize];
            fill_deterministic(
                &mut buf,
                spec.salt ^ mix(0x71D0_0000 + (i as u64) * 4 + p as u64),
            );
            planes.push(buf);
            strides.push(w as usize);
        }
        let key_frame = self.model.is_keyframe(i);
        let repeat_pict = self.model.repeat(i);
        Ok(Some(VideoFrame {
            planes,
            strides,
            width: spec.width,
            height: spec.height,
            format,
            pts: self.model.pts(i),
            duration: spec.pts_step,
            colorimetry: Colorimetry::default(),
            interlaced: false,
            tff: self.model.tff(i),
            pict_type: if key_frame { 'I' } else { 'P' },
            key_frame,
            repeat_pict,
            mastering_display: None,
            content_light: None,
            dolby_vision_rpu: None,
            hdr10_plus: None,
            icc_profile: None,
        }))
    }

    fn flush(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        Ok(None)
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}

// ── Deterministic content generation ─────────────────────────────────

fn mix(seed: u64) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Fill `buf` from a xorshift stream seeded by `seed`.
fn fill_deterministic(buf: &mut [u8], seed: u64) {
    let mut state = mix(seed) | 1;
    for chunk in buf.chunks_mut(8) {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
}

// ── Tests ────────────────────────────────────────────────────────────
