//! Decoder cursors — one independent decode position per instance.
//!
//! A cursor owns a demuxer and a decoder for one track and drives the
//! read-packet → submit → receive loop, retrying past recoverable packet
//! glitches. It tracks the index of the frame the next
//! [`next_frame`](AudioCursor::next_frame) call will return, and (audio)
//! the running sample position.
//!
//! After a successful [`seek`](AudioCursor::seek) the frame counter is
//! meaningless until the caller resolves the landing position and calls
//! `set_position`; the `has_seeked` flag marks that window.

use tracing::warn;

use fl_common::error::{DecodeError, OpenError};
use fl_common::frame::{AudioFrame, VideoFrame};
use fl_common::options::SourceDescriptor;
use fl_common::properties::{AudioProperties, VideoProperties};

use crate::traits::{
    AudioStreamProps, Demuxer, FrameDecoder, MediaBackend, VideoStreamProps,
};

/// Media-type-independent cursor machinery.
struct CursorCore<F> {
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn FrameDecoder<Frame = F>>,
    current_frame: i64,
    seeked: bool,
    exhausted: bool,
}

impl<F> CursorCore<F> {
    fn new(demuxer: Box<dyn Demuxer>, decoder: Box<dyn FrameDecoder<Frame = F>>) -> Self {
        Self {
            demuxer,
            decoder,
            current_frame: 0,
            seeked: false,
            exhausted: false,
        }
    }

    fn next_frame(&mut self) -> Result<Option<F>, DecodeError> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            if let Some(frame) = self.decoder.receive()? {
                self.current_frame += 1;
                return Ok(Some(frame));
            }
            match self.demuxer.read_packet() {
                Ok(Some(packet)) => match self.decoder.submit(&packet) {
                    Ok(()) => {}
                    Err(DecodeError::Corrupt(reason)) => {
                        warn!(reason, "Skipping corrupt packet");
                    }
                    Err(e) => return Err(e),
                },
                Ok(None) => {
                    return match self.decoder.flush()? {
                        Some(frame) => {
                            self.current_frame += 1;
                            Ok(Some(frame))
                        }
                        None => {
                            self.exhausted = true;
                            Ok(None)
                        }
                    };
                }
                Err(DecodeError::Corrupt(reason)) => {
                    warn!(reason, "Skipping unreadable packet");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn seek(&mut self, pts: i64) -> bool {
        let ok = self.demuxer.seek(pts);
        if ok {
            self.decoder.reset();
            self.seeked = true;
            self.exhausted = false;
        }
        ok
    }
}

// ── Audio ────────────────────────────────────────────────────────────

/// One decode position into an audio track.
pub struct AudioCursor {
    core: CursorCore<AudioFrame>,
    props: AudioStreamProps,
    current_sample: i64,
}

impl AudioCursor {
    pub fn open(backend: &dyn MediaBackend, desc: &SourceDescriptor) -> Result<Self, OpenError> {
        let track = backend.open_audio(desc)?;
        Ok(Self {
            core: CursorCore::new(track.demuxer, track.decoder),
            props: track.props,
            current_sample: 0,
        })
    }

    /// Resolved absolute track number.
    pub fn track(&self) -> i32 {
        self.props.track
    }

    pub fn stream_props(&self) -> &AudioStreamProps {
        &self.props
    }

    pub fn source_size(&self) -> i64 {
        self.props.source_size
    }

    /// Bytes consumed from the source so far.
    pub fn position(&self) -> i64 {
        self.core.demuxer.position()
    }

    /// Index of the frame the next `next_frame` call returns.
    pub fn current_frame(&self) -> i64 {
        self.core.current_frame
    }

    /// Sample position of the frame the next `next_frame` call returns.
    pub fn current_sample(&self) -> i64 {
        self.current_sample
    }

    /// Decode one frame to fill the format fields that only become known
    /// after the first decode. The frame is consumed from the stream.
    ///
    /// # Panics
    ///
    /// Panics unless called immediately after open, before any decoding
    /// or seeking.
    pub fn read_properties(&mut self) -> Result<AudioProperties, DecodeError> {
        assert!(
            self.core.current_frame == 0 && !self.core.seeked,
            "read_properties is only valid immediately after open"
        );
        let frame = self.next_frame()?.ok_or(DecodeError::Failed {
            frame: 0,
            reason: "stream contains no decodable frames".into(),
        })?;
        Ok(AudioProperties {
            format: frame.format,
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            channel_layout: frame.channel_layout,
            num_frames: -1,
            num_samples: self.props.estimated_samples,
            start_time: self.props.time_base.pts_to_seconds(frame.pts),
        })
    }

    /// Next decoded frame, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<AudioFrame>, DecodeError> {
        let frame = self.core.next_frame()?;
        if let Some(f) = &frame {
            self.current_sample += f.num_samples;
        }
        Ok(frame)
    }

    /// Advance `count` frames without delivering output. Returns whether
    /// all `count` frames were skipped before end of stream.
    pub fn skip_frames(&mut self, count: i64) -> Result<bool, DecodeError> {
        for _ in 0..count {
            if self.next_frame()?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Seek the demuxer to `pts`. On success the cursor is in the seeked
    /// state and the frame counter is stale until `set_position`.
    pub fn seek(&mut self, pts: i64) -> bool {
        self.core.seek(pts)
    }

    pub fn has_seeked(&self) -> bool {
        self.core.seeked
    }

    /// Realign the counters after the post-seek landing position has been
    /// resolved. Clears the seeked state.
    pub fn set_position(&mut self, frame: i64, sample: i64) {
        self.core.current_frame = frame;
        self.current_sample = sample;
        self.core.seeked = false;
    }

    pub fn has_more_frames(&self) -> bool {
        !self.core.exhausted
    }
}

// ── Video ────────────────────────────────────────────────────────────

/// One decode position into a video track.
pub struct VideoCursor {
    core: CursorCore<VideoFrame>,
    props: VideoStreamProps,
}

impl VideoCursor {
    pub fn open(backend: &dyn MediaBackend, desc: &SourceDescriptor) -> Result<Self, OpenError> {
        let track = backend.open_video(desc)?;
        Ok(Self {
            core: CursorCore::new(track.demuxer, track.decoder),
            props: track.props,
        })
    }

    /// Resolved absolute track number.
    pub fn track(&self) -> i32 {
        self.props.track
    }

    pub fn stream_props(&self) -> &VideoStreamProps {
        &self.props
    }

    pub fn source_size(&self) -> i64 {
        self.props.source_size
    }

    /// Bytes consumed from the source so far.
    pub fn position(&self) -> i64 {
        self.core.demuxer.position()
    }

    /// Index of the frame the next `next_frame` call returns.
    pub fn current_frame(&self) -> i64 {
        self.core.current_frame
    }

    /// Decode one frame to fill the format fields that only become known
    /// after the first decode. The frame is consumed from the stream.
    ///
    /// # Panics
    ///
    /// Panics unless called immediately after open, before any decoding
    /// or seeking.
    pub fn read_properties(&mut self) -> Result<VideoProperties, DecodeError> {
        assert!(
            self.core.current_frame == 0 && !self.core.seeked,
            "read_properties is only valid immediately after open"
        );
        let frame = self.next_frame()?.ok_or(DecodeError::Failed {
            frame: 0,
            reason: "stream contains no decodable frames".into(),
        })?;
        let p = &self.props;
        let mut vp = VideoProperties {
            time_base: p.time_base,
            start_time: p.time_base.pts_to_seconds(frame.pts),
            duration: p.duration,
            num_frames: -1,
            num_rff_frames: -1,
            fps: p.fps,
            sar: p.sar,
            format: frame.format,
            width: frame.width,
            height: frame.height,
            ss_mod_width: 0,
            ss_mod_height: 0,
            field_based: frame.interlaced,
            tff: frame.tff,
            stereo3d_type: p.stereo3d_type,
            stereo3d_flags: p.stereo3d_flags,
            mastering_display: frame.mastering_display,
            content_light: frame.content_light,
            flip_vertical: p.flip_vertical,
            flip_horizontal: p.flip_horizontal,
            rotation: p.rotation,
        };
        vp.apply_ss_mod();
        Ok(vp)
    }

    /// Next decoded frame, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        self.core.next_frame()
    }

    /// Advance `count` frames without delivering output. Returns whether
    /// all `count` frames were skipped before end of stream.
    pub fn skip_frames(&mut self, count: i64) -> Result<bool, DecodeError> {
        for _ in 0..count {
            if self.next_frame()?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Seek the demuxer to `pts`. On success the cursor is in the seeked
    /// state and the frame counter is stale until `set_position`.
    pub fn seek(&mut self, pts: i64) -> bool {
        self.core.seek(pts)
    }

    pub fn has_seeked(&self) -> bool {
        self.core.seeked
    }

    /// Realign the frame counter after the post-seek landing position has
    /// been resolved. Clears the seeked state.
    pub fn set_position(&mut self, frame: i64) {
        self.core.current_frame = frame;
        self.core.seeked = false;
    }

    pub fn has_more_frames(&self) -> bool {
        !self.core.exhausted
    }
}

// ── Tests ────────────────────────────────────────────────────────────
