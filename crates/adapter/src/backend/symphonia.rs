//! Audio backend built on Symphonia.
//!
//! Symphonia's split between a `FormatReader` (packets) and a `Decoder`
//! (frames) maps directly onto the demux/decode seam. Decoded samples are
//! kept in the codec's native sample format via `RawSampleBuffer`; no
//! conversion to a common format is performed.
//!
//! This backend provides audio tracks only; video decoding comes from a
//! different backend behind the same traits.

use std::fs::File;

use symphonia::core::audio::{AudioBufferRef, RawSampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::debug;

use fl_common::error::{DecodeError, OpenError};
use fl_common::frame::{AudioFrame, SampleFormat};
use fl_common::options::SourceDescriptor;
use fl_common::types::{Rational, TrackSelector};

use crate::traits::{
    AudioStreamProps, AudioTrack, Demuxer, FrameDecoder, MediaBackend, Packet, VideoTrack,
};

/// Backend that opens real files through Symphonia.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaBackend;

impl MediaBackend for SymphoniaBackend {
    fn open_audio(&self, desc: &SourceDescriptor) -> Result<AudioTrack, OpenError> {
        let path = desc.path.as_path();
        let file =
            File::open(path).map_err(|e| OpenError::FileOpen(format!("{path:?}: {e}")))?;
        let source_size = std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(-1);
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| OpenError::FileOpen(format!("{e}")))?;
        let reader = probed.format;

        let (abs_track, track) = select_audio_track(reader.as_ref(), desc.track)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| OpenError::Backend("no sample rate in codec parameters".into()))?;
        let channels = codec_params
            .channels
            .ok_or_else(|| OpenError::Backend("no channel info in codec parameters".into()))?;

        let time_base = codec_params
            .time_base
            .map(|tb| Rational::new(tb.numer, tb.denom))
            .unwrap_or_else(|| Rational::new(1, sample_rate));

        let decoder_opts = DecoderOptions {
            verify: matches!(
                desc.decoder_options.get("verify").map(String::as_str),
                Some("1") | Some("true")
            ),
        };
        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &decoder_opts)
            .map_err(|e| OpenError::UnsupportedCodec(format!("{e}")))?;

        let props = AudioStreamProps {
            track: abs_track,
            time_base,
            sample_rate,
            channels: channels.count() as u32,
            channel_layout: channels.bits() as u64,
            estimated_samples: codec_params.n_frames.map(|n| n as i64).unwrap_or(-1),
            source_size,
            codec_fingerprint: format!(
                "{:?}:{}:{}:{:?}",
                codec_params.codec,
                sample_rate,
                channels.count(),
                codec_params.bits_per_sample,
            )
            .into_bytes(),
        };

        debug!(
            path = %path.display(),
            track = abs_track,
            sample_rate,
            channels = props.channels,
            "Opened audio track"
        );

        Ok(AudioTrack {
            demuxer: Box::new(SymphoniaDemuxer {
                reader,
                track_id,
                time_base,
                bytes_read: 0,
            }),
            decoder: Box::new(SymphoniaAudioDecoder {
                decoder,
                track_id,
                pending: None,
            }),
            props,
        })
    }

    fn open_video(&self, _desc: &SourceDescriptor) -> Result<VideoTrack, OpenError> {
        Err(OpenError::Backend(
            "the symphonia backend provides audio tracks only".into(),
        ))
    }
}

/// Resolve a track selector against the reader's track list. Returns the
/// absolute track number and the matching track.
fn select_audio_track(
    reader: &dyn FormatReader,
    selector: TrackSelector,
) -> Result<(i32, &symphonia::core::formats::Track), OpenError> {
    let tracks = reader.tracks();
    let is_audio = |t: &symphonia::core::formats::Track| {
        t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.channels.is_some()
    };
    match selector {
        TrackSelector::Absolute(raw) => {
            let idx = usize::try_from(raw).map_err(|_| OpenError::TrackNotFound {
                selector: selector.to_string(),
            })?;
            let track = tracks.get(idx).ok_or_else(|| OpenError::TrackNotFound {
                selector: selector.to_string(),
            })?;
            if !is_audio(track) {
                return Err(OpenError::WrongMediaType {
                    track: raw,
                    media: fl_common::types::MediaType::Audio,
                });
            }
            Ok((raw, track))
        }
        TrackSelector::NthOfType(n) => {
            let (idx, track) = tracks
                .iter()
                .enumerate()
                .filter(|(_, t)| is_audio(t))
                .nth(n as usize)
                .ok_or_else(|| OpenError::TrackNotFound {
                    selector: selector.to_string(),
                })?;
            Ok((idx as i32, track))
        }
    }
}

struct SymphoniaDemuxer {
    reader: Box<dyn FormatReader>,
    track_id: u32,
    time_base: Rational,
    bytes_read: i64,
}

impl Demuxer for SymphoniaDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(SymphoniaError::DecodeError(msg)) => {
                    return Err(DecodeError::Corrupt(msg.to_string()));
                }
                Err(e) => return Err(DecodeError::Read(format!("{e}"))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            self.bytes_read += packet.buf().len() as i64;
            return Ok(Some(Packet {
                data: packet.buf().to_vec(),
                pts: packet.ts() as i64,
                dts: packet.ts() as i64,
                duration: packet.dur() as i64,
                keyframe: true,
            }));
        }
    }

    fn seek(&mut self, pts: i64) -> bool {
        let seconds = self.time_base.pts_to_seconds(pts.max(0));
        let seek_to = SeekTo::Time {
            time: Time::from(seconds),
            track_id: Some(self.track_id),
        };
        match self.reader.seek(SeekMode::Coarse, seek_to) {
            Ok(_) => {
                debug!(pts, seconds, "Seeked audio demuxer");
                true
            }
            Err(_) => false,
        }
    }

    fn position(&self) -> i64 {
        self.bytes_read
    }
}

struct SymphoniaAudioDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    pending: Option<AudioFrame>,
}

impl FrameDecoder for SymphoniaAudioDecoder {
    type Frame = AudioFrame;

    fn submit(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        let sym_packet = symphonia::core::formats::Packet::new_from_boxed_slice(
            self.track_id,
            packet.pts.max(0) as u64,
            packet.duration.max(0) as u64,
            packet.data.clone().into_boxed_slice(),
        );
        let decoded = match self.decoder.decode(&sym_packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                return Err(DecodeError::Corrupt(msg.to_string()));
            }
            Err(e) => {
                return Err(DecodeError::Failed {
                    frame: -1,
                    reason: format!("{e}"),
                });
            }
        };
        if decoded.frames() == 0 {
            return Ok(());
        }
        self.pending = Some(convert_native(decoded, packet.pts));
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<AudioFrame>, DecodeError> {
        Ok(self.pending.take())
    }

    fn flush(&mut self) -> Result<Option<AudioFrame>, DecodeError> {
        // Symphonia decoders emit one buffer per packet with no delay.
        Ok(None)
    }

    fn reset(&mut self) {
        self.pending = None;
        self.decoder.reset();
    }
}

/// Copy a decoded buffer into an interleaved byte buffer without leaving
/// the native sample family. The rare unsigned/small formats are widened
/// to the nearest common width, which is lossless.
fn convert_native(decoded: AudioBufferRef<'_>, pts: i64) -> AudioFrame {
    let spec = *decoded.spec();
    let frames = decoded.frames();

    macro_rules! raw {
        ($t:ty) => {{
            let mut buf = RawSampleBuffer::<$t>::new(frames as u64, spec);
            buf.copy_interleaved_ref(decoded);
            buf.as_bytes().to_vec()
        }};
    }

    let (bytes, format) = match decoded {
        AudioBufferRef::U8(_) => (raw!(u8), SampleFormat {
            is_float: false,
            bytes_per_sample: 1,
            bits_per_sample: 8,
        }),
        AudioBufferRef::S8(_) | AudioBufferRef::U16(_) | AudioBufferRef::S16(_) => {
            (raw!(i16), SampleFormat::S16)
        }
        AudioBufferRef::U24(_) | AudioBufferRef::S24(_) => (raw!(i32), SampleFormat {
            is_float: false,
            bytes_per_sample: 4,
            bits_per_sample: 24,
        }),
        AudioBufferRef::U32(_) | AudioBufferRef::S32(_) => (raw!(i32), SampleFormat::S32),
        AudioBufferRef::F32(_) => (raw!(f32), SampleFormat::F32),
        AudioBufferRef::F64(_) => (raw!(f64), SampleFormat {
            is_float: true,
            bytes_per_sample: 8,
            bits_per_sample: 64,
        }),
    };

    AudioFrame {
        planes: vec![bytes],
        format,
        sample_rate: spec.rate,
        channels: spec.channels.count() as u32,
        channel_layout: spec.channels.bits() as u64,
        pts,
        num_samples: frames as i64,
    }
}

// ── Tests ────────────────────────────────────────────────────────────
