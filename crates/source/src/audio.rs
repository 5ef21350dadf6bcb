//! Frame-accurate audio source with sample-domain reads.
//!
//! `AudioSource` owns a track index, a decoder cursor pool, and a
//! decoded-frame cache, and exposes both frame-indexed retrieval and
//! arbitrary sample-range reads. Sample ranges reaching outside the
//! stream are zero-filled at the edges without touching the decoder.
//!
//! A source is a single-owner object internally: every public operation
//! serializes on its lock. Independent sources are fully independent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fl_adapter::cursor::{AudioCursor, VideoCursor};
use fl_adapter::traits::MediaBackend;
use fl_common::error::{SourceError, SourceResult};
use fl_common::frame::AudioFrame;
use fl_common::options::SourceDescriptor;
use fl_common::progress::Progress;
use fl_common::properties::AudioProperties;
use fl_common::types::{MediaType, TrackSelector};
use fl_index::indexer::index_audio_track;
use fl_index::persist::{
    default_cache_path, read_audio_index, source_mtime, write_audio_index, CacheIdentity,
};
use fl_index::types::{AudioFrameInfo, AudioTrackIndex};

use crate::cache::CacheStats;
use crate::engine::SeekEngine;
use crate::{DEFAULT_MAX_CACHE_BYTES, DEFAULT_MAX_SKIP_AHEAD, DEFAULT_PREROLL_AUDIO, MAX_CURSORS};

/// The frames covering a sample range, from
/// [`AudioSource::frame_range_by_samples`]. All fields are −1 when the
/// range misses the stream entirely.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameRange {
    pub first: i64,
    pub last: i64,
    /// Sample position where `first` starts.
    pub first_sample_pos: i64,
}

struct AudioInner {
    backend: Arc<dyn MediaBackend>,
    desc: SourceDescriptor,
    props: AudioProperties,
    index: AudioTrackIndex,
    engine: SeekEngine<AudioCursor>,
    track: i32,
}

impl AudioInner {
    fn get_frame(&mut self, n: i64) -> SourceResult<Arc<AudioFrame>> {
        let AudioInner {
            backend,
            desc,
            engine,
            index,
            ..
        } = self;
        let mut open = || AudioCursor::open(backend.as_ref(), desc);
        engine.get_frame(index, &mut open, n)
    }
}

/// Randomly addressable decoded audio track.
pub struct AudioSource {
    inner: Mutex<AudioInner>,
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource").finish_non_exhaustive()
    }
}

impl AudioSource {
    /// Open a track, reusing a persisted index when one matches the
    /// source exactly and indexing the track otherwise.
    ///
    /// `cache_path` overrides the default sidecar location. `progress`
    /// is only consulted while indexing and may cancel it.
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        desc: SourceDescriptor,
        cache_path: Option<&Path>,
        progress: Option<Progress<'_>>,
    ) -> SourceResult<Self> {
        let mut probe = AudioCursor::open(backend.as_ref(), &desc)?;
        let track = probe.track();
        let mut props = probe.read_properties()?;

        let cache_file: PathBuf = cache_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_cache_path(&desc.path, track, MediaType::Audio));
        let identity = CacheIdentity::new(
            probe.source_size(),
            source_mtime(&desc.path),
            track,
            MediaType::Audio,
            &probe.stream_props().codec_fingerprint,
        );

        let index = load_or_build_index(backend.as_ref(), &desc, &cache_file, &identity, progress)?;
        props.num_frames = index.len();
        props.num_samples = index.num_samples();

        let mut engine = SeekEngine::new(
            MAX_CURSORS,
            DEFAULT_PREROLL_AUDIO,
            DEFAULT_MAX_CACHE_BYTES,
            DEFAULT_MAX_SKIP_AHEAD,
        );
        engine.adopt_cursor(probe);

        Ok(Self {
            inner: Mutex::new(AudioInner {
                backend,
                desc,
                props,
                index,
                engine,
                track,
            }),
        })
    }

    /// Resolved absolute track number.
    pub fn track(&self) -> i32 {
        self.inner.lock().track
    }

    pub fn audio_properties(&self) -> AudioProperties {
        self.inner.lock().props.clone()
    }

    pub fn set_max_cache_size(&self, bytes: usize) {
        self.inner.lock().engine.set_max_cache_size(bytes);
    }

    pub fn set_seek_preroll(&self, frames: i64) {
        self.inner.lock().engine.set_preroll(frames);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.lock().engine.cache_stats()
    }

    /// Whether the source has fallen back to linear decoding.
    pub fn linear_decoding_state(&self) -> bool {
        self.inner.lock().engine.is_linear()
    }

    /// Seek targets proven unreliable so far.
    pub fn bad_seek_locations(&self) -> Vec<i64> {
        self.inner.lock().engine.bad_seek_locations()
    }

    /// Index entry for frame `n`.
    pub fn frame_info(&self, n: i64) -> SourceResult<AudioFrameInfo> {
        let inner = self.inner.lock();
        let len = inner.index.len();
        if n < 0 || n >= len {
            return Err(SourceError::OutOfRange { index: n, len });
        }
        Ok(inner.index.frames[n as usize])
    }

    /// Decoded frame `n`.
    pub fn get_frame(&self, n: i64) -> SourceResult<Arc<AudioFrame>> {
        self.inner.lock().get_frame(n)
    }

    /// Decoded frame `n`, permanently switching the source to linear
    /// decoding first.
    pub fn get_frame_linear(&self, n: i64) -> SourceResult<Arc<AudioFrame>> {
        let mut inner = self.inner.lock();
        inner.engine.set_linear_mode();
        inner.get_frame(n)
    }

    /// Frames covering the sample range `[start, start + count)`,
    /// clipped to the stream.
    pub fn frame_range_by_samples(&self, start: i64, count: i64) -> FrameRange {
        let inner = self.inner.lock();
        let num = inner.index.num_samples();
        let lo = start.max(0);
        let hi = start.saturating_add(count).min(num);
        if count <= 0 || lo >= hi {
            return FrameRange {
                first: -1,
                last: -1,
                first_sample_pos: -1,
            };
        }
        let first = inner.index.frame_from_sample(lo);
        let last = inner.index.frame_from_sample(hi - 1);
        FrameRange {
            first,
            last,
            first_sample_pos: inner.index.frames[first as usize].start_sample,
        }
    }

    /// Read `count` samples starting at `start` into one interleaved
    /// buffer. Samples outside `[0, num_samples)` come back as zero
    /// bytes without invoking the decoder.
    ///
    /// # Panics
    ///
    /// Panics if `count` is negative or `dst` is too small
    /// (`count × channels × bytes_per_sample`).
    pub fn packed_audio(&self, dst: &mut [u8], start: i64, count: i64) -> SourceResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let stride = (inner.props.format.bytes_per_sample * inner.props.channels) as usize;
        assert!(count >= 0, "sample count must be non-negative");
        assert!(
            dst.len() >= count as usize * stride,
            "destination buffer too small for {count} samples"
        );
        if count == 0 {
            return Ok(());
        }

        let (start, count, mut offset) = zero_fill_packed(dst, start, count, stride, &inner.index);

        let mut pos = start;
        let mut remaining = count;
        while remaining > 0 {
            let frame_idx = inner.index.frame_from_sample(pos);
            let info = inner.index.frames[frame_idx as usize];
            let frame = inner.get_frame(frame_idx)?;
            let within = pos - info.start_sample;
            let take = (info.length - within).min(remaining);
            copy_packed(
                &frame,
                within,
                take,
                &mut dst[offset..offset + take as usize * stride],
            );
            offset += take as usize * stride;
            pos += take;
            remaining -= take;
        }
        Ok(())
    }

    /// Read `count` samples starting at `start` into one buffer per
    /// channel. Same edge semantics as [`packed_audio`](Self::packed_audio).
    ///
    /// # Panics
    ///
    /// Panics if `count` is negative, `dst` does not hold exactly one
    /// buffer per channel, or any buffer is smaller than
    /// `count × bytes_per_sample`.
    pub fn planar_audio(&self, dst: &mut [&mut [u8]], start: i64, count: i64) -> SourceResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let bps = inner.props.format.bytes_per_sample as usize;
        assert!(count >= 0, "sample count must be non-negative");
        assert_eq!(
            dst.len(),
            inner.props.channels as usize,
            "one destination buffer per channel"
        );
        for d in dst.iter() {
            assert!(
                d.len() >= count as usize * bps,
                "destination buffer too small for {count} samples"
            );
        }
        if count == 0 {
            return Ok(());
        }

        let (start, count, mut done) = zero_fill_planar(dst, start, count, bps, &inner.index);

        let mut pos = start;
        let mut remaining = count;
        while remaining > 0 {
            let frame_idx = inner.index.frame_from_sample(pos);
            let info = inner.index.frames[frame_idx as usize];
            let frame = inner.get_frame(frame_idx)?;
            let within = pos - info.start_sample;
            let take = (info.length - within).min(remaining);
            copy_planar(&frame, within, take, dst, done);
            done += take as usize;
            pos += take;
            remaining -= take;
        }
        Ok(())
    }

    /// Difference between another track's start time and this track's,
    /// in seconds. Positive means the other track starts later.
    pub fn relative_start_time(&self, track: TrackSelector) -> SourceResult<f64> {
        let inner = self.inner.lock();
        let desc = inner.desc.clone().with_track(track);
        let own_start = inner.props.start_time;
        match AudioCursor::open(inner.backend.as_ref(), &desc) {
            Ok(mut cursor) => {
                let other = cursor.read_properties()?;
                Ok(other.start_time - own_start)
            }
            Err(audio_err) => match VideoCursor::open(inner.backend.as_ref(), &desc) {
                Ok(mut cursor) => {
                    let other = cursor.read_properties()?;
                    Ok(other.start_time - own_start)
                }
                Err(_) => Err(audio_err.into()),
            },
        }
    }
}

fn load_or_build_index(
    backend: &dyn MediaBackend,
    desc: &SourceDescriptor,
    cache_file: &Path,
    identity: &CacheIdentity,
    progress: Option<Progress<'_>>,
) -> SourceResult<AudioTrackIndex> {
    match read_audio_index(cache_file, identity) {
        Ok(index) if index.validate().is_ok() => {
            info!(path = %cache_file.display(), "Using cached audio index");
            return Ok(index);
        }
        Ok(_) => warn!(path = %cache_file.display(), "Cached audio index fails validation, re-indexing"),
        Err(e) => debug!(error = %e, "Audio index cache unusable, indexing track"),
    }

    let mut cursor = AudioCursor::open(backend, desc)?;
    let index = index_audio_track(&mut cursor, progress)?;
    index.validate()?;
    if let Err(e) = write_audio_index(cache_file, identity, &index) {
        warn!(error = %e, "Failed to persist audio index");
    }
    Ok(index)
}

// ── Buffer assembly ──────────────────────────────────────────────────

/// Zero the parts of a packed request outside the stream. Returns the
/// clamped `(start, count)` and the byte offset where decoded data
/// begins.
fn zero_fill_packed(
    dst: &mut [u8],
    mut start: i64,
    mut count: i64,
    stride: usize,
    index: &AudioTrackIndex,
) -> (i64, i64, usize) {
    let mut offset = 0usize;
    if start < 0 {
        let fill = (-start).min(count);
        let bytes = fill as usize * stride;
        dst[..bytes].fill(0);
        offset = bytes;
        start += fill;
        count -= fill;
    }
    let num_samples = index.num_samples();
    if count > 0 && start + count > num_samples {
        let over = (start + count - num_samples).min(count);
        let in_range = count - over;
        let from = offset + in_range as usize * stride;
        dst[from..from + over as usize * stride].fill(0);
        count = in_range;
    }
    (start, count, offset)
}

/// Planar twin of [`zero_fill_packed`]; the returned offset is in
/// samples, applied to every channel buffer.
fn zero_fill_planar(
    dst: &mut [&mut [u8]],
    mut start: i64,
    mut count: i64,
    bps: usize,
    index: &AudioTrackIndex,
) -> (i64, i64, usize) {
    let mut done = 0usize;
    if start < 0 {
        let fill = (-start).min(count);
        for d in dst.iter_mut() {
            d[..fill as usize * bps].fill(0);
        }
        done = fill as usize;
        start += fill;
        count -= fill;
    }
    let num_samples = index.num_samples();
    if count > 0 && start + count > num_samples {
        let over = (start + count - num_samples).min(count);
        let in_range = count - over;
        for d in dst.iter_mut() {
            let from = (done + in_range as usize) * bps;
            d[from..from + over as usize * bps].fill(0);
        }
        count = in_range;
    }
    (start, count, done)
}

/// Copy `count` samples starting at `from_sample` of `frame` into an
/// interleaved destination.
fn copy_packed(frame: &AudioFrame, from_sample: i64, count: i64, dst: &mut [u8]) {
    let bps = frame.format.bytes_per_sample as usize;
    let stride = bps * frame.channels as usize;
    if !frame.is_planar() {
        let from = from_sample as usize * stride;
        let len = count as usize * stride;
        dst[..len].copy_from_slice(&frame.planes[0][from..from + len]);
    } else {
        for s in 0..count as usize {
            for (c, plane) in frame.planes.iter().enumerate() {
                let src = (from_sample as usize + s) * bps;
                let d = s * stride + c * bps;
                dst[d..d + bps].copy_from_slice(&plane[src..src + bps]);
            }
        }
    }
}

/// Copy `count` samples starting at `from_sample` of `frame` into
/// per-channel destinations at sample offset `dst_off`.
fn copy_planar(
    frame: &AudioFrame,
    from_sample: i64,
    count: i64,
    dst: &mut [&mut [u8]],
    dst_off: usize,
) {
    let bps = frame.format.bytes_per_sample as usize;
    if frame.is_planar() {
        for (c, plane) in frame.planes.iter().enumerate() {
            let src = from_sample as usize * bps;
            let len = count as usize * bps;
            let d = dst_off * bps;
            dst[c][d..d + len].copy_from_slice(&plane[src..src + len]);
        }
    } else {
        let stride = bps * frame.channels as usize;
        for s in 0..count as usize {
            for c in 0..frame.channels as usize {
                let src = (from_sample as usize + s) * stride + c * bps;
                let d = (dst_off + s) * bps;
                dst[c][d..d + bps].copy_from_slice(&frame.planes[0][src..src + bps]);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fl_adapter::backend::synthetic::{SyntheticAudio, SyntheticBackend};

    fn temp_cache(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fl_source_audio_tests");
        let _ = std::fs::create_dir_all(&dir);
        dir.join(format!("{name}.flidx"))
    }

    fn make_source(name: &str, spec: SyntheticAudio) -> AudioSource {
        let backend = Arc::new(SyntheticBackend::default().with_audio(spec));
        let cache = temp_cache(name);
        let _ = std::fs::remove_file(&cache);
        AudioSource::new(
            backend,
            SourceDescriptor::new("synthetic"),
            Some(&cache),
            None,
        )
        .unwrap()
    }

    fn stride(src: &AudioSource) -> usize {
        let p = src.audio_properties();
        (p.format.bytes_per_sample * p.channels) as usize
    }

    /// Reference read: concatenate decoded frames and slice.
    fn reference_bytes(src: &AudioSource, start: i64, count: i64) -> Vec<u8> {
        let p = src.audio_properties();
        let stride = (p.format.bytes_per_sample * p.channels) as usize;
        let mut all = Vec::new();
        for n in 0..p.num_frames {
            let f = src.get_frame(n).unwrap();
            all.extend_from_slice(&f.planes[0]);
        }
        all[start as usize * stride..(start + count) as usize * stride].to_vec()
    }

    // ── Properties ───────────────────────────────────────────────

    #[test]
    fn properties_are_exact_after_indexing() {
        let src = make_source("props", SyntheticAudio::new(7).with_frame_lengths(vec![100, 50]));
        let p = src.audio_properties();
        assert_eq!(p.num_frames, 7);
        assert_eq!(p.num_samples, 4 * 100 + 3 * 50);
        assert_eq!(p.sample_rate, 48000);
        assert_eq!(src.track(), 0);
    }

    // ── Frame access ─────────────────────────────────────────────

    #[test]
    fn frames_match_their_index_entries() {
        let src = make_source("frames", SyntheticAudio::new(20));
        for &n in &[0i64, 13, 5, 19, 5] {
            let f = src.get_frame(n).unwrap();
            let info = src.frame_info(n).unwrap();
            assert_eq!(f.pts, info.pts);
            assert_eq!(f.num_samples, info.length);
            assert_eq!(fl_common::frame::DecodedFrame::content_hash(&*f), info.hash);
        }
    }

    #[test]
    fn out_of_range_frame_is_rejected() {
        let src = make_source("range", SyntheticAudio::new(3));
        assert!(matches!(
            src.get_frame(3),
            Err(SourceError::OutOfRange { index: 3, len: 3 })
        ));
        assert!(src.frame_info(-1).is_err());
    }

    // ── Sample ranges ────────────────────────────────────────────

    #[test]
    fn frame_range_by_samples_covers_request() {
        let src = make_source("franges", SyntheticAudio::new(5).with_frame_lengths(vec![100]));
        let r = src.frame_range_by_samples(150, 200);
        assert_eq!(r.first, 1);
        assert_eq!(r.last, 3);
        assert_eq!(r.first_sample_pos, 100);

        let r = src.frame_range_by_samples(-10, 20);
        assert_eq!(r.first, 0);

        let r = src.frame_range_by_samples(10_000, 5);
        assert_eq!(r, FrameRange { first: -1, last: -1, first_sample_pos: -1 });

        let r = src.frame_range_by_samples(0, 0);
        assert_eq!(r.first, -1);
    }

    #[test]
    fn packed_reads_equal_frame_slicing() {
        let src = make_source("packed", SyntheticAudio::new(9).with_frame_lengths(vec![64, 96]));
        let stride = stride(&src);
        for &(start, count) in &[(0i64, 64i64), (60, 80), (100, 1), (0, 9 * 96)] {
            let count = count.min(src.audio_properties().num_samples - start);
            let mut buf = vec![0xAAu8; count as usize * stride];
            src.packed_audio(&mut buf, start, count).unwrap();
            assert_eq!(buf, reference_bytes(&src, start, count), "range {start}+{count}");
        }
    }

    #[test]
    fn leading_and_trailing_zero_fill() {
        let src = make_source("zfill", SyntheticAudio::new(4).with_frame_lengths(vec![50]));
        let stride = stride(&src);
        let num = src.audio_properties().num_samples;

        // 100 samples before the stream, 100 into it.
        let mut buf = vec![0xAAu8; 200 * stride];
        src.packed_audio(&mut buf, -100, 200).unwrap();
        assert!(buf[..100 * stride].iter().all(|&b| b == 0));
        assert_eq!(&buf[100 * stride..], &reference_bytes(&src, 0, 100)[..]);

        // Straddling the end.
        let mut buf = vec![0xAAu8; 100 * stride];
        src.packed_audio(&mut buf, num - 40, 100).unwrap();
        assert_eq!(&buf[..40 * stride], &reference_bytes(&src, num - 40, 40)[..]);
        assert!(buf[40 * stride..].iter().all(|&b| b == 0));
    }

    #[test]
    fn fully_out_of_range_reads_are_all_zero() {
        let src = make_source("allzero", SyntheticAudio::new(3).with_frame_lengths(vec![10]));
        let stride = stride(&src);

        let mut buf = vec![0xAAu8; 20 * stride];
        src.packed_audio(&mut buf, -1000, 20).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        let mut buf = vec![0xAAu8; 20 * stride];
        src.packed_audio(&mut buf, 1_000_000, 20).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn planar_matches_deinterleaved_packed() {
        let src = make_source("planar", SyntheticAudio::new(6).with_frame_lengths(vec![40]));
        let p = src.audio_properties();
        let bps = p.format.bytes_per_sample as usize;
        let channels = p.channels as usize;
        let count = 90i64;
        let start = -10i64;

        let mut packed = vec![0u8; (count as usize) * bps * channels];
        src.packed_audio(&mut packed, start, count).unwrap();

        let mut buffers: Vec<Vec<u8>> = vec![vec![0u8; count as usize * bps]; channels];
        {
            let mut views: Vec<&mut [u8]> =
                buffers.iter_mut().map(|b| b.as_mut_slice()).collect();
            src.planar_audio(&mut views, start, count).unwrap();
        }

        for s in 0..count as usize {
            for c in 0..channels {
                let from_packed = &packed[(s * channels + c) * bps..][..bps];
                let from_planar = &buffers[c][s * bps..][..bps];
                assert_eq!(from_packed, from_planar, "sample {s} channel {c}");
            }
        }
    }

    #[test]
    fn repeated_random_reads_are_identical() {
        let src = make_source("stable", SyntheticAudio::new(30));
        let stride = stride(&src);
        let num = src.audio_properties().num_samples;

        let mut first = vec![0u8; stride];
        src.packed_audio(&mut first, 0, 1).unwrap();
        let mut last = vec![0u8; stride];
        src.packed_audio(&mut last, num - 1, 1).unwrap();
        let mut again = vec![0u8; stride];
        src.packed_audio(&mut again, 0, 1).unwrap();
        assert_eq!(first, again);
    }

    // ── Relative start times ─────────────────────────────────────

    #[test]
    fn relative_start_time_between_two_tracks() {
        let backend = Arc::new(
            SyntheticBackend::default()
                .with_audio(SyntheticAudio::new(5))
                .with_audio(SyntheticAudio::new(5).with_salt(7).with_first_pts(48000)),
        );
        let cache = temp_cache("relstart");
        let _ = std::fs::remove_file(&cache);
        let src = AudioSource::new(
            backend,
            SourceDescriptor::new("synthetic"),
            Some(&cache),
            None,
        )
        .unwrap();
        // The second track starts one second later (48000 ticks at 1/48000).
        let delta = src.relative_start_time(TrackSelector::NthOfType(1)).unwrap();
        assert!((delta - 1.0).abs() < 1e-9, "delta was {delta}");
    }
}
