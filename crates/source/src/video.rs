//! Frame-accurate video source.
//!
//! `VideoSource` exposes frame-indexed retrieval plus the display-indexed
//! view after RFF (pulldown) expansion, time-based lookup, field-order
//! queries, and timecode export.
//!
//! A source is a single-owner object internally: every public operation
//! serializes on its lock. Independent sources are fully independent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fl_adapter::cursor::VideoCursor;
use fl_adapter::traits::MediaBackend;
use fl_common::error::{SourceError, SourceResult};
use fl_common::frame::VideoFrame;
use fl_common::options::SourceDescriptor;
use fl_common::progress::Progress;
use fl_common::properties::VideoProperties;
use fl_common::types::MediaType;
use fl_index::indexer::index_video_track;
use fl_index::persist::{
    default_cache_path, read_video_index, source_mtime, write_video_index, CacheIdentity,
};
use fl_index::types::{VideoFrameInfo, VideoTrackIndex};

use crate::cache::CacheStats;
use crate::engine::SeekEngine;
use crate::rff::{build_field_map, rff_frame_count, RffState};
use crate::timemap::{frame_for_time, write_timecodes_v2};
use crate::{DEFAULT_MAX_CACHE_BYTES, DEFAULT_MAX_SKIP_AHEAD, DEFAULT_PREROLL_VIDEO, MAX_CURSORS};

struct VideoInner {
    backend: Arc<dyn MediaBackend>,
    desc: SourceDescriptor,
    props: VideoProperties,
    index: VideoTrackIndex,
    engine: SeekEngine<VideoCursor>,
    rff: RffState,
    track: i32,
}

impl VideoInner {
    fn get_frame(&mut self, n: i64) -> SourceResult<Arc<VideoFrame>> {
        let VideoInner {
            backend,
            desc,
            engine,
            index,
            ..
        } = self;
        let mut open = || VideoCursor::open(backend.as_ref(), desc);
        engine.get_frame(index, &mut open, n)
    }

    fn ensure_rff(&mut self) {
        if matches!(self.rff, RffState::Uninitialized) {
            self.rff = build_field_map(&self.index);
            match &self.rff {
                RffState::Ready(pairs) => {
                    info!(display_frames = pairs.len(), "RFF field map initialized")
                }
                _ => debug!("Track carries no repeat-field flags"),
            }
        }
    }
}

/// Randomly addressable decoded video track.
pub struct VideoSource {
    inner: Mutex<VideoInner>,
}

impl VideoSource {
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
        let mut probe = VideoCursor::open(backend.as_ref(), &desc)?;
        let track = probe.track();
        let mut props = probe.read_properties()?;

        let cache_file: PathBuf = cache_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_cache_path(&desc.path, track, MediaType::Video));
        let identity = CacheIdentity::new(
            probe.source_size(),
            source_mtime(&desc.path),
            track,
            MediaType::Video,
            &probe.stream_props().codec_fingerprint,
        );

        let index = load_or_build_index(backend.as_ref(), &desc, &cache_file, &identity, progress)?;
        props.num_frames = index.len();
        props.num_rff_frames = rff_frame_count(&index);

        let mut engine = SeekEngine::new(
            MAX_CURSORS,
            DEFAULT_PREROLL_VIDEO,
            DEFAULT_MAX_CACHE_BYTES,
            DEFAULT_MAX_SKIP_AHEAD,
        );
        engine.adopt_cursor(probe);

        Ok(Self {
            inner: Mutex::new(VideoInner {
                backend,
                desc,
                props,
                index,
                engine,
                rff: RffState::Uninitialized,
                track,
            }),
        })
    }

    /// Resolved absolute track number.
    pub fn track(&self) -> i32 {
        self.inner.lock().track
    }

    pub fn video_properties(&self) -> VideoProperties {
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
    pub fn frame_info(&self, n: i64) -> SourceResult<VideoFrameInfo> {
        let inner = self.inner.lock();
        let len = inner.index.len();
        if n < 0 || n >= len {
            return Err(SourceError::OutOfRange { index: n, len });
        }
        Ok(inner.index.frames[n as usize])
    }

    /// Decoded frame `n` (RFF ignored).
    pub fn get_frame(&self, n: i64) -> SourceResult<Arc<VideoFrame>> {
        self.inner.lock().get_frame(n)
    }

    /// Decoded frame `n`, permanently switching the source to linear
    /// decoding first.
    pub fn get_frame_linear(&self, n: i64) -> SourceResult<Arc<VideoFrame>> {
        let mut inner = self.inner.lock();
        inner.engine.set_linear_mode();
        inner.get_frame(n)
    }

    /// Display frame `n` of the RFF-expanded sequence. Display frames
    /// whose fields come from two source frames are synthesized by field
    /// merging; otherwise this is a plain frame lookup.
    pub fn get_frame_with_rff(&self, n: i64) -> SourceResult<Arc<VideoFrame>> {
        let mut inner = self.inner.lock();
        inner.ensure_rff();
        let pair = match &inner.rff {
            RffState::Ready(pairs) => {
                let len = pairs.len() as i64;
                if n < 0 || n >= len {
                    return Err(SourceError::OutOfRange { index: n, len });
                }
                Some(pairs[n as usize])
            }
            _ => None,
        };
        match pair {
            None => inner.get_frame(n),
            Some(pair) if pair.is_whole() => inner.get_frame(pair.top),
            Some(pair) => {
                let top = inner.get_frame(pair.top)?;
                let bottom = inner.get_frame(pair.bottom)?;
                let mut merged = (*top).clone();
                merged.merge_field(false, &bottom)?;
                Ok(Arc::new(merged))
            }
        }
    }

    /// Frame whose presentation interval contains `seconds`.
    pub fn get_frame_by_time(&self, seconds: f64) -> SourceResult<Arc<VideoFrame>> {
        let mut inner = self.inner.lock();
        if inner.index.is_empty() {
            return Err(SourceError::OutOfRange { index: 0, len: 0 });
        }
        let n = frame_for_time(&inner.index, inner.props.time_base, seconds);
        inner.get_frame(n)
    }

    /// Whether frame `n` — display-indexed when `rff` is true — is
    /// top-field-first.
    pub fn frame_is_tff(&self, n: i64, rff: bool) -> SourceResult<bool> {
        let mut inner = self.inner.lock();
        if rff {
            inner.ensure_rff();
            if let RffState::Ready(pairs) = &inner.rff {
                let len = pairs.len() as i64;
                if n < 0 || n >= len {
                    return Err(SourceError::OutOfRange { index: n, len });
                }
                return Ok(inner.index.frames[pairs[n as usize].top as usize].tff);
            }
        }
        let len = inner.index.len();
        if n < 0 || n >= len {
            return Err(SourceError::OutOfRange { index: n, len });
        }
        Ok(inner.index.frames[n as usize].tff)
    }

    /// Write a `# timecode format v2` file with one timestamp per frame
    /// in display order, RFF-expanded when the track carries repeat
    /// flags.
    pub fn write_timecodes(&self, path: &Path) -> SourceResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_rff();
        let tb = inner.props.time_base;
        let frames = &inner.index.frames;
        let result = match &inner.rff {
            RffState::Ready(pairs) => write_timecodes_v2(
                path,
                pairs
                    .iter()
                    .map(|p| tb.pts_to_seconds(frames[p.first as usize].pts) * 1000.0),
            ),
            _ => write_timecodes_v2(
                path,
                frames.iter().map(|f| tb.pts_to_seconds(f.pts) * 1000.0),
            ),
        };
        result.map_err(SourceError::Io)
    }
}

fn load_or_build_index(
    backend: &dyn MediaBackend,
    desc: &SourceDescriptor,
    cache_file: &Path,
    identity: &CacheIdentity,
    progress: Option<Progress<'_>>,
) -> SourceResult<VideoTrackIndex> {
    match read_video_index(cache_file, identity) {
        Ok(index) => {
            info!(path = %cache_file.display(), "Using cached video index");
            return Ok(index);
        }
        Err(e) => debug!(error = %e, "Video index cache unusable, indexing track"),
    }

    let mut cursor = VideoCursor::open(backend, desc)?;
    let index = index_video_track(&mut cursor, progress)?;
    if let Err(e) = write_video_index(cache_file, identity, &index) {
        warn!(error = %e, "Failed to persist video index");
    }
    Ok(index)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fl_adapter::backend::synthetic::{SyntheticBackend, SyntheticVideo};
    use fl_common::frame::DecodedFrame;

    fn temp_cache(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fl_source_video_tests");
        let _ = std::fs::create_dir_all(&dir);
        dir.join(format!("{name}.flidx"))
    }

    fn make_source(name: &str, spec: SyntheticVideo) -> VideoSource {
        let backend = Arc::new(SyntheticBackend::default().with_video(spec));
        let cache = temp_cache(name);
        let _ = std::fs::remove_file(&cache);
        VideoSource::new(
            backend,
            SourceDescriptor::new("synthetic"),
            Some(&cache),
            None,
        )
        .unwrap()
    }

    /// 3:2 pulldown pattern.
    fn telecine(frames: i64) -> SyntheticVideo {
        SyntheticVideo::new(frames).with_repeat_pict(vec![1, 0])
    }

    // ── Basic access ─────────────────────────────────────────────

    #[test]
    fn frames_match_their_index_entries() {
        let src = make_source("basic", SyntheticVideo::new(60).with_gop(10));
        for &n in &[0i64, 45, 7, 59, 30] {
            let f = src.get_frame(n).unwrap();
            let info = src.frame_info(n).unwrap();
            assert_eq!(f.content_hash(), info.hash);
            assert_eq!(f.pts, info.pts);
        }
        assert!(!src.linear_decoding_state());
    }

    #[test]
    fn properties_know_frame_counts() {
        let src = make_source("props", telecine(8));
        let p = src.video_properties();
        assert_eq!(p.num_frames, 8);
        assert_eq!(p.num_rff_frames, 10);
        assert_eq!(p.width, 64);
    }

    // ── RFF ──────────────────────────────────────────────────────

    #[test]
    fn rff_unused_passes_through() {
        let src = make_source("rff_off", SyntheticVideo::new(10));
        let a = src.get_frame(4).unwrap();
        let b = src.get_frame_with_rff(4).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(src.video_properties().num_rff_frames, 10);
    }

    #[test]
    fn rff_merged_display_frame_combines_fields() {
        let src = make_source("rff_merge", telecine(8));
        // Display frame 1 takes its top field from frame 0 and its
        // bottom field from frame 1.
        let merged = src.get_frame_with_rff(1).unwrap();
        let f0 = src.get_frame(0).unwrap();
        let f1 = src.get_frame(1).unwrap();

        assert_ne!(merged.content_hash(), f0.content_hash());
        assert_ne!(merged.content_hash(), f1.content_hash());
        for p in 0..merged.planes.len() {
            let stride = merged.strides[p];
            let rows = merged.plane_height(p) as usize;
            for row in 0..rows {
                let src_frame = if row % 2 == 0 { &f0 } else { &f1 };
                assert_eq!(
                    &merged.planes[p][row * stride..(row + 1) * stride],
                    &src_frame.planes[p][row * stride..(row + 1) * stride],
                    "plane {p} row {row}"
                );
            }
        }
    }

    #[test]
    fn rff_display_range_is_checked() {
        let src = make_source("rff_range", telecine(8));
        assert!(src.get_frame_with_rff(9).is_ok());
        assert!(matches!(
            src.get_frame_with_rff(10),
            Err(SourceError::OutOfRange { index: 10, len: 10 })
        ));
    }

    // ── Time lookup ──────────────────────────────────────────────

    #[test]
    fn time_lookup_finds_containing_frame() {
        let src = make_source("bytime", SyntheticVideo::new(30));
        // Frame 10 starts at 10·1001/30000 s.
        let f = src.get_frame_by_time(10.0 * 1001.0 / 30000.0 + 0.001).unwrap();
        assert_eq!(f.pts, 10 * 1001);
    }

    // ── TFF queries ──────────────────────────────────────────────

    #[test]
    fn tff_follows_field_parity() {
        let src = make_source("tff", telecine(8));
        assert!(src.frame_is_tff(0, false).unwrap());
        // Frame 1 leads with its bottom field after the repeated field.
        assert!(!src.frame_is_tff(1, false).unwrap());
        // Display frame 1 merges with frame 0 on top.
        assert!(src.frame_is_tff(1, true).unwrap());
    }

    // ── Timecodes ────────────────────────────────────────────────

    #[test]
    fn timecodes_expand_with_rff() {
        let src = make_source("timecodes", telecine(8));
        let path = std::env::temp_dir()
            .join("fl_source_video_tests")
            .join("tc_rff.txt");
        src.write_timecodes(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# timecode format v2");
        assert_eq!(lines.len() as i64, 1 + src.video_properties().num_rff_frames);
        let _ = std::fs::remove_file(&path);
    }

    // ── Persistence integration ──────────────────────────────────

    #[test]
    fn second_open_reuses_index_cache() {
        let backend = Arc::new(SyntheticBackend::default().with_video(SyntheticVideo::new(25)));
        let cache = temp_cache("reuse");
        let _ = std::fs::remove_file(&cache);
        let desc = SourceDescriptor::new("synthetic");

        let mut indexed_frames = 0;
        {
            let mut cb = |_r: fl_common::progress::ProgressReport| {
                indexed_frames += 1;
                fl_common::progress::ProgressControl::Continue
            };
            let _ =
                VideoSource::new(backend.clone(), desc.clone(), Some(&cache), Some(&mut cb))
                    .unwrap();
        }
        assert_eq!(indexed_frames, 25, "first open indexes the track");

        let mut reindexed = 0;
        {
            let mut cb = |_r: fl_common::progress::ProgressReport| {
                reindexed += 1;
                fl_common::progress::ProgressControl::Continue
            };
            let src =
                VideoSource::new(backend, desc, Some(&cache), Some(&mut cb)).unwrap();
            assert_eq!(src.video_properties().num_frames, 25);
        }
        assert_eq!(reindexed, 0, "second open loads the cache");

        let _ = std::fs::remove_file(&cache);
    }
}
