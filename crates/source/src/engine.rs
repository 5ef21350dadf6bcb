//! Seek/retry engine — turns "give me frame N" into a correct decoded
//! frame.
//!
//! Random mode allows seeks: pick a keyframe comfortably before the
//! target, seek to its PTS, resolve where the decoder actually landed by
//! hashing the first decoded frame against the index, then decode forward
//! into the preroll window. Seek targets that land wrong are blacklisted
//! and the previous keyframe is tried, up to a retry budget; exhausting
//! the budget permanently switches the engine to linear mode, where
//! cursors only ever rewind to the start and walk forward.
//!
//! The engine is generic over a small capability set so the same state
//! machine serves audio (sample-position-carrying) and video cursors.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use fl_adapter::cursor::{AudioCursor, VideoCursor};
use fl_common::error::{DecodeError, OpenError, SourceError, SourceResult};
use fl_common::frame::{AudioFrame, DecodedFrame, VideoFrame};
use fl_common::hash::ContentHash;
use fl_common::types::NO_PTS;
use fl_index::types::{AudioTrackIndex, VideoTrackIndex};

use crate::cache::{CacheStats, FrameCache};
use crate::pool::CursorPool;
use crate::RETRY_SEEK_ATTEMPTS;

/// What the engine needs from a decoder cursor.
pub(crate) trait EngineCursor {
    type Frame: DecodedFrame;

    /// Index of the frame the next `next_frame` call returns.
    fn current_frame(&self) -> i64;
    fn next_frame(&mut self) -> Result<Option<Self::Frame>, DecodeError>;
    fn skip_frames(&mut self, count: i64) -> Result<bool, DecodeError>;
    fn seek(&mut self, pts: i64) -> bool;
    /// Realign counters after a resolved seek landing.
    fn set_position(&mut self, frame: i64, start_sample: i64);
}

/// What the engine needs from a track index.
pub(crate) trait SeekIndex {
    fn frame_count(&self) -> i64;
    fn pts_of(&self, n: i64) -> i64;
    /// Latest usable seek target at or before `n`: an independently
    /// decodable frame with a known PTS.
    fn seek_candidate(&self, n: i64) -> Option<i64>;
    /// Sample position of frame `n`; `n == frame_count` yields the
    /// total sample count. Video tracks return 0.
    fn start_sample_of(&self, n: i64) -> i64;
    fn hash_of(&self, n: i64) -> ContentHash;
}

enum Resync<F> {
    /// The first decoded frame after the seek was the target itself.
    Hit(Arc<F>),
    /// Cursor realigned at some earlier frame; decode forward.
    At,
    /// Landing could not be validated; blacklist and retry.
    Bad,
}

pub(crate) struct SeekEngine<C: EngineCursor> {
    pool: CursorPool<C>,
    cache: FrameCache<C::Frame>,
    bad_seeks: BTreeSet<i64>,
    linear: bool,
    preroll: i64,
    max_skip_ahead: i64,
}

impl<C: EngineCursor> SeekEngine<C> {
    pub fn new(
        pool_capacity: usize,
        preroll: i64,
        max_cache_bytes: usize,
        max_skip_ahead: i64,
    ) -> Self {
        Self {
            pool: CursorPool::new(pool_capacity),
            cache: FrameCache::new(max_cache_bytes),
            bad_seeks: BTreeSet::new(),
            linear: false,
            preroll,
            max_skip_ahead,
        }
    }

    /// Hand an already-open cursor (e.g. the property probe) to the pool.
    pub fn adopt_cursor(&mut self, cursor: C) {
        let slot = self.pool.lru_slot();
        self.pool.put(slot, cursor);
    }

    pub fn is_linear(&self) -> bool {
        self.linear
    }

    pub fn bad_seek_locations(&self) -> Vec<i64> {
        self.bad_seeks.iter().copied().collect()
    }

    pub fn set_preroll(&mut self, frames: i64) {
        self.preroll = frames.max(0);
    }

    pub fn set_max_cache_size(&mut self, bytes: usize) {
        self.cache.set_max_size(bytes);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Permanently forbid seeks and discard every cursor.
    pub fn set_linear_mode(&mut self) {
        if !self.linear {
            warn!(
                cursors_dropped = self.pool.occupied(),
                "Switching to linear decoding; seeks are disabled from here on"
            );
            self.linear = true;
            self.pool.drop_all();
        }
    }

    /// Retrieve frame `n`, decoding as little as the track allows.
    pub fn get_frame<I, O>(
        &mut self,
        index: &I,
        open: &mut O,
        n: i64,
    ) -> SourceResult<Arc<C::Frame>>
    where
        I: SeekIndex,
        O: FnMut() -> Result<C, OpenError>,
    {
        let len = index.frame_count();
        if n < 0 || n >= len {
            return Err(SourceError::OutOfRange { index: n, len });
        }
        if let Some(frame) = self.cache.get(n) {
            trace!(n, "Frame cache hit");
            return Ok(frame);
        }
        if self.linear {
            return self.get_frame_linear(open, n);
        }

        // A cursor already close behind the target beats any seek.
        if let Some(slot) =
            self.pool
                .best_for(n, self.preroll, self.max_skip_ahead, |c| c.current_frame())
        {
            let mut cursor = self.pool.take(slot).expect("selected slot is occupied");
            trace!(n, from = cursor.current_frame(), "Reusing close cursor");
            let frame = self.walk_to(&mut cursor, n)?;
            self.pool.put(slot, cursor);
            return Ok(frame);
        }

        let mut attempts = 0usize;
        while attempts < RETRY_SEEK_ATTEMPTS {
            let Some(seek_frame) = self.choose_seek_frame(index, n) else {
                // No usable seek target for this request; serve it
                // linearly without giving up random access.
                return self.get_frame_linear(open, n);
            };
            let slot = self.pool.lru_slot();
            let mut cursor = match self.pool.take(slot) {
                Some(c) => c,
                None => open()?,
            };
            match self.seek_and_resync(index, &mut cursor, n, seek_frame) {
                Resync::Hit(frame) => {
                    self.pool.put(slot, cursor);
                    return Ok(frame);
                }
                Resync::At => {
                    let frame = self.walk_to(&mut cursor, n)?;
                    self.pool.put(slot, cursor);
                    return Ok(frame);
                }
                Resync::Bad => {
                    // Cursor state is undefined after a bad landing; it
                    // is dropped rather than returned to the pool.
                    attempts += 1;
                    self.bad_seeks.insert(seek_frame);
                    warn!(seek_frame, attempts, "Seek target blacklisted");
                }
            }
        }

        self.set_linear_mode();
        self.get_frame_linear(open, n).map_err(|e| {
            warn!(n, error = %e, "Linear fallback failed after seek retries");
            SourceError::Seek { frame: n }
        })
    }

    fn get_frame_linear<O>(&mut self, open: &mut O, n: i64) -> SourceResult<Arc<C::Frame>>
    where
        O: FnMut() -> Result<C, OpenError>,
    {
        if let Some(frame) = self.cache.get(n) {
            return Ok(frame);
        }
        let slot = self
            .pool
            .nearest_at_or_before(n, |c| c.current_frame())
            .unwrap_or_else(|| self.pool.lru_slot());
        let mut cursor = match self.pool.take(slot) {
            Some(c) if c.current_frame() <= n => c,
            _ => {
                debug!(n, "Opening fresh cursor for linear walk");
                open()?
            }
        };
        let frame = self.walk_to(&mut cursor, n)?;
        self.pool.put(slot, cursor);
        Ok(frame)
    }

    /// Decode forward to `n`: skip until the preroll window, then decode
    /// and cache every frame through the target.
    fn walk_to(&mut self, cursor: &mut C, n: i64) -> SourceResult<Arc<C::Frame>> {
        let skip = n - self.preroll - cursor.current_frame();
        if skip > 0 {
            trace!(skip, "Skipping ahead of the cache window");
            if !cursor.skip_frames(skip)? {
                return Err(DecodeError::Failed {
                    frame: cursor.current_frame(),
                    reason: "end of stream while advancing to target".into(),
                }
                .into());
            }
        }
        loop {
            let at = cursor.current_frame();
            match cursor.next_frame()? {
                Some(frame) => {
                    let frame = Arc::new(frame);
                    self.cache.cache_frame(at, frame.clone());
                    match at.cmp(&n) {
                        std::cmp::Ordering::Equal => return Ok(frame),
                        std::cmp::Ordering::Greater => {
                            return Err(DecodeError::Failed {
                                frame: at,
                                reason: "cursor overran the target frame".into(),
                            }
                            .into());
                        }
                        std::cmp::Ordering::Less => {}
                    }
                }
                None => {
                    return Err(DecodeError::Failed {
                        frame: at,
                        reason: "end of stream before target frame".into(),
                    }
                    .into());
                }
            }
        }
    }

    /// Latest non-blacklisted seek target at or before `n − preroll`.
    fn choose_seek_frame<I: SeekIndex>(&self, index: &I, n: i64) -> Option<i64> {
        let mut k = index.seek_candidate(n - self.preroll)?;
        while self.bad_seeks.contains(&k) {
            k = index.seek_candidate(k - 1)?;
        }
        Some(k)
    }

    /// Seek to `seek_frame` and work out where the decoder actually
    /// landed by hashing its first output against the index.
    fn seek_and_resync<I: SeekIndex>(
        &mut self,
        index: &I,
        cursor: &mut C,
        n: i64,
        seek_frame: i64,
    ) -> Resync<C::Frame> {
        let pts = index.pts_of(seek_frame);
        debug!(n, seek_frame, pts, "Seeking");
        if !cursor.seek(pts) {
            return Resync::Bad;
        }
        let frame = match cursor.next_frame() {
            Ok(Some(f)) => f,
            Ok(None) => return Resync::Bad,
            Err(e) => {
                warn!(error = %e, "Decode failed directly after seek");
                return Resync::Bad;
            }
        };
        match self.resolve_identity(index, &frame, seek_frame, n) {
            Some(k) => {
                cursor.set_position(k + 1, index.start_sample_of(k + 1));
                let frame = Arc::new(frame);
                self.cache.cache_frame(k, frame.clone());
                if k == n {
                    Resync::Hit(frame)
                } else {
                    trace!(landed = k, "Resynchronized after seek");
                    Resync::At
                }
            }
            None => {
                debug!(seek_frame, "Post-seek frame matches no index entry");
                Resync::Bad
            }
        }
    }

    /// Match a decoded frame against index entries in
    /// `[seek_frame − preroll, n]`. A landing past `n` (overshoot) or
    /// outside the window resolves to nothing and fails the seek.
    fn resolve_identity<I: SeekIndex>(
        &self,
        index: &I,
        frame: &C::Frame,
        seek_frame: i64,
        n: i64,
    ) -> Option<i64> {
        let hash = frame.content_hash();
        let pts = frame.pts();
        let lo = (seek_frame - self.preroll).max(0);
        (lo..=n).find(|&k| {
            if index.hash_of(k) != hash {
                return false;
            }
            let ipts = index.pts_of(k);
            ipts == pts || ipts == NO_PTS || pts == NO_PTS
        })
    }
}

// ── Capability wiring ────────────────────────────────────────────────

impl EngineCursor for AudioCursor {
    type Frame = AudioFrame;

    fn current_frame(&self) -> i64 {
        AudioCursor::current_frame(self)
    }

    fn next_frame(&mut self) -> Result<Option<AudioFrame>, DecodeError> {
        AudioCursor::next_frame(self)
    }

    fn skip_frames(&mut self, count: i64) -> Result<bool, DecodeError> {
        AudioCursor::skip_frames(self, count)
    }

    fn seek(&mut self, pts: i64) -> bool {
        AudioCursor::seek(self, pts)
    }

    fn set_position(&mut self, frame: i64, start_sample: i64) {
        AudioCursor::set_position(self, frame, start_sample)
    }
}

impl EngineCursor for VideoCursor {
    type Frame = VideoFrame;

    fn current_frame(&self) -> i64 {
        VideoCursor::current_frame(self)
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        VideoCursor::next_frame(self)
    }

    fn skip_frames(&mut self, count: i64) -> Result<bool, DecodeError> {
        VideoCursor::skip_frames(self, count)
    }

    fn seek(&mut self, pts: i64) -> bool {
        VideoCursor::seek(self, pts)
    }

    fn set_position(&mut self, frame: i64, _start_sample: i64) {
        VideoCursor::set_position(self, frame)
    }
}

impl SeekIndex for AudioTrackIndex {
    fn frame_count(&self) -> i64 {
        self.len()
    }

    fn pts_of(&self, n: i64) -> i64 {
        self.frames[n as usize].pts
    }

    fn seek_candidate(&self, n: i64) -> Option<i64> {
        // Every audio frame decodes independently; any known PTS works.
        if self.is_empty() || n < 0 {
            return None;
        }
        let from = n.min(self.len() - 1);
        (0..=from).rev().find(|&k| self.frames[k as usize].pts != NO_PTS)
    }

    fn start_sample_of(&self, n: i64) -> i64 {
        if n >= self.len() {
            self.num_samples()
        } else {
            self.frames[n as usize].start_sample
        }
    }

    fn hash_of(&self, n: i64) -> ContentHash {
        self.frames[n as usize].hash
    }
}

impl SeekIndex for VideoTrackIndex {
    fn frame_count(&self) -> i64 {
        self.len()
    }

    fn pts_of(&self, n: i64) -> i64 {
        self.frames[n as usize].pts
    }

    fn seek_candidate(&self, n: i64) -> Option<i64> {
        if n < 0 {
            return None;
        }
        self.prev_keyframe(n)
    }

    fn start_sample_of(&self, _n: i64) -> i64 {
        0
    }

    fn hash_of(&self, n: i64) -> ContentHash {
        self.frames[n as usize].hash
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fl_adapter::backend::synthetic::{
        SeekBehavior, SyntheticAudio, SyntheticBackend, SyntheticVideo,
    };
    use fl_common::options::SourceDescriptor;
    use fl_index::indexer::{index_audio_track, index_video_track};

    fn desc() -> SourceDescriptor {
        SourceDescriptor::new("synthetic")
    }

    fn video_setup(spec: SyntheticVideo) -> (SyntheticBackend, VideoTrackIndex) {
        let backend = SyntheticBackend::default().with_video(spec);
        let mut cursor = VideoCursor::open(&backend, &desc()).unwrap();
        let index = index_video_track(&mut cursor, None).unwrap();
        (backend, index)
    }

    fn audio_setup(spec: SyntheticAudio) -> (SyntheticBackend, AudioTrackIndex) {
        let backend = SyntheticBackend::default().with_audio(spec);
        let mut cursor = AudioCursor::open(&backend, &desc()).unwrap();
        let index = index_audio_track(&mut cursor, None).unwrap();
        (backend, index)
    }

    fn video_engine() -> SeekEngine<VideoCursor> {
        SeekEngine::new(4, 20, 1 << 30, 4096)
    }

    fn get_video(
        engine: &mut SeekEngine<VideoCursor>,
        backend: &SyntheticBackend,
        index: &VideoTrackIndex,
        n: i64,
    ) -> Arc<VideoFrame> {
        let d = desc();
        let mut open = || VideoCursor::open(backend, &d);
        engine.get_frame(index, &mut open, n).unwrap()
    }

    // ── Random access correctness ────────────────────────────────

    #[test]
    fn random_requests_return_hash_exact_frames() {
        let (backend, index) = video_setup(SyntheticVideo::new(100).with_gop(10));
        let mut engine = video_engine();
        for &n in &[0i64, 50, 10, 99, 25, 99, 0] {
            let frame = get_video(&mut engine, &backend, &index, n);
            assert_eq!(
                frame.content_hash(),
                index.frames[n as usize].hash,
                "frame {n} content mismatch"
            );
        }
        assert!(!engine.is_linear());
        assert!(engine.bad_seek_locations().is_empty());
    }

    #[test]
    fn out_of_range_is_rejected() {
        let (backend, index) = video_setup(SyntheticVideo::new(10));
        let mut engine = video_engine();
        let d = desc();
        let mut open = || VideoCursor::open(&backend, &d);
        assert!(matches!(
            engine.get_frame(&index, &mut open, 10),
            Err(SourceError::OutOfRange { index: 10, len: 10 })
        ));
        assert!(matches!(
            engine.get_frame(&index, &mut open, -1),
            Err(SourceError::OutOfRange { .. })
        ));
    }

    #[test]
    fn cache_hit_returns_shared_handle() {
        let (backend, index) = video_setup(SyntheticVideo::new(50));
        let mut engine = video_engine();
        let a = get_video(&mut engine, &backend, &index, 30);
        let b = get_video(&mut engine, &backend, &index, 30);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn early_frames_resolve_without_permanent_linear_mode() {
        // No seek target exists before frame preroll; the request is
        // served linearly but random access stays enabled.
        let (backend, index) = video_setup(SyntheticVideo::new(50).with_gop(10));
        let mut engine = video_engine();
        let f = get_video(&mut engine, &backend, &index, 5);
        assert_eq!(f.content_hash(), index.frames[5].hash);
        assert!(!engine.is_linear());
    }

    // ── Broken seeks ─────────────────────────────────────────────

    #[test]
    fn broken_sync_point_is_blacklisted_then_recovered() {
        let broken: std::collections::BTreeSet<i64> = [70i64].into_iter().collect();
        let (backend, index) = video_setup(
            SyntheticVideo::new(2000)
                .with_gop(10)
                .with_seek(SeekBehavior::BrokenAt(broken)),
        );
        let mut engine = video_engine();
        // Target 95 → seek target 70 (broken, lands at 1070) → retry 60.
        let f = get_video(&mut engine, &backend, &index, 95);
        assert_eq!(f.content_hash(), index.frames[95].hash);
        assert_eq!(engine.bad_seek_locations(), vec![70]);
        assert!(!engine.is_linear());
    }

    #[test]
    fn undershooting_seeks_still_resolve() {
        let (backend, index) = video_setup(
            SyntheticVideo::new(300)
                .with_gop(10)
                .with_seek(SeekBehavior::LandsShort(7)),
        );
        let mut engine = video_engine();
        let f = get_video(&mut engine, &backend, &index, 150);
        assert_eq!(f.content_hash(), index.frames[150].hash);
        assert!(engine.bad_seek_locations().is_empty());
    }

    #[test]
    fn retry_budget_exhaustion_switches_to_linear() {
        let (backend, index) = video_setup(
            SyntheticVideo::new(300)
                .with_gop(4)
                .with_seek(SeekBehavior::Refused),
        );
        let mut engine = video_engine();
        let f = get_video(&mut engine, &backend, &index, 250);
        assert_eq!(f.content_hash(), index.frames[250].hash);
        assert!(engine.is_linear());
        assert_eq!(engine.bad_seek_locations().len(), RETRY_SEEK_ATTEMPTS);

        // Still serves frames afterwards, without seeking.
        let f = get_video(&mut engine, &backend, &index, 40);
        assert_eq!(f.content_hash(), index.frames[40].hash);
    }

    #[test]
    fn linear_mode_reuses_preceding_cursor() {
        let (backend, index) = video_setup(SyntheticVideo::new(100));
        let mut engine = video_engine();
        engine.set_linear_mode();
        let f = get_video(&mut engine, &backend, &index, 10);
        assert_eq!(f.content_hash(), index.frames[10].hash);
        // Forward request continues from the same cursor.
        let f = get_video(&mut engine, &backend, &index, 20);
        assert_eq!(f.content_hash(), index.frames[20].hash);
        // Backward request forces a rewind and still works.
        let f = get_video(&mut engine, &backend, &index, 3);
        assert_eq!(f.content_hash(), index.frames[3].hash);
    }

    // ── Audio instantiation ──────────────────────────────────────

    #[test]
    fn audio_random_access_realigns_sample_positions() {
        let (backend, index) = audio_setup(
            SyntheticAudio::new(200).with_frame_lengths(vec![100, 150, 125]),
        );
        let mut engine: SeekEngine<AudioCursor> = SeekEngine::new(4, 40, 1 << 30, 4096);
        let d = desc();
        for &n in &[0i64, 150, 42, 199, 100] {
            let mut open = || AudioCursor::open(&backend, &d);
            let frame = engine.get_frame(&index, &mut open, n).unwrap();
            assert_eq!(frame.content_hash(), index.frames[n as usize].hash);
            assert_eq!(frame.pts, index.frames[n as usize].pts);
        }
        assert!(!engine.is_linear());
    }

    // ── Cache interaction ────────────────────────────────────────

    #[test]
    fn walk_populates_cache_within_preroll() {
        let (backend, index) = video_setup(SyntheticVideo::new(100).with_gop(10));
        let mut engine = video_engine();
        let _ = get_video(&mut engine, &backend, &index, 60);
        // Neighbors inside the preroll window arrived with the walk.
        let stats = engine.cache_stats();
        assert!(stats.entries > 1, "walk should cache the preroll window");
        let before = engine.cache_stats().entries;
        let _ = get_video(&mut engine, &backend, &index, 59);
        assert_eq!(engine.cache_stats().entries, before, "59 was cached");
    }

    #[test]
    fn shrunk_cache_budget_is_respected() {
        let (backend, index) = video_setup(SyntheticVideo::new(100));
        let mut engine = video_engine();
        let _ = get_video(&mut engine, &backend, &index, 50);
        let frame_bytes = index_frame_bytes(&backend);
        engine.set_max_cache_size(frame_bytes * 2);
        assert!(engine.cache_stats().size_bytes <= frame_bytes * 2);
    }

    fn index_frame_bytes(backend: &SyntheticBackend) -> usize {
        let mut c = VideoCursor::open(backend, &desc()).unwrap();
        c.next_frame().unwrap().unwrap().byte_size()
    }
}
