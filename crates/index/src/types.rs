//! Track index data model.
//!
//! One index per opened track, built by a single pass over every packet.
//! The per-frame records are what make random access possible: presentation
//! timestamps locate seek targets, content hashes resolve a decoder's true
//! position after a seek, and (audio) sample positions map the sample
//! domain onto frames.

use fl_common::error::IndexError;
use fl_common::hash::ContentHash;
use fl_common::types::NO_PTS;

/// Per-frame metadata for a video track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VideoFrameInfo {
    pub pts: i64,
    pub repeat_pict: i32,
    pub key_frame: bool,
    pub tff: bool,
    pub hash: ContentHash,
}

/// Per-frame metadata for an audio track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AudioFrameInfo {
    pub pts: i64,
    /// First sample of this frame in the track's sample stream.
    pub start_sample: i64,
    /// Samples in this frame.
    pub length: i64,
    pub hash: ContentHash,
}

/// Complete index of a video track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoTrackIndex {
    pub frames: Vec<VideoFrameInfo>,
    /// Duration of the final frame, derived from the last PTS step.
    pub last_frame_duration: i64,
}

impl VideoTrackIndex {
    pub fn len(&self) -> i64 {
        self.frames.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Latest frame `k <= from` that is a usable seek target: a keyframe
    /// with a known PTS.
    pub fn prev_keyframe(&self, from: i64) -> Option<i64> {
        if self.frames.is_empty() {
            return None;
        }
        let from = from.min(self.len() - 1);
        (0..=from)
            .rev()
            .find(|&k| {
                let f = &self.frames[k as usize];
                f.key_frame && f.pts != NO_PTS
            })
    }
}

/// Complete index of an audio track.
///
/// Sample positions are assigned by concatenation: PTS-adjacent frames
/// are treated as contiguous, so `start_sample[i] = start_sample[i-1] +
/// length[i-1]` always holds. Containers that carry genuine gaps will
/// have their silence under-counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioTrackIndex {
    pub frames: Vec<AudioFrameInfo>,
}

impl AudioTrackIndex {
    pub fn len(&self) -> i64 {
        self.frames.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Exact total sample count.
    pub fn num_samples(&self) -> i64 {
        self.frames
            .last()
            .map(|f| f.start_sample + f.length)
            .unwrap_or(0)
    }

    /// Frame containing sample `sample`.
    ///
    /// # Panics
    ///
    /// Panics if `sample` is outside `[0, num_samples())`.
    pub fn frame_from_sample(&self, sample: i64) -> i64 {
        assert!(
            sample >= 0 && sample < self.num_samples(),
            "sample {sample} outside [0, {})",
            self.num_samples()
        );
        match self
            .frames
            .binary_search_by_key(&sample, |f| f.start_sample)
        {
            Ok(i) => i as i64,
            Err(i) => i as i64 - 1,
        }
    }

    /// Check the contiguity invariant over the whole index.
    pub fn validate(&self) -> Result<(), IndexError> {
        let mut expected = self.frames.first().map(|f| f.start_sample).unwrap_or(0);
        for (i, f) in self.frames.iter().enumerate() {
            if f.length <= 0 {
                return Err(IndexError::Inconsistent {
                    frame: i as i64,
                    reason: format!("non-positive frame length {}", f.length),
                });
            }
            if f.start_sample != expected {
                return Err(IndexError::Inconsistent {
                    frame: i as i64,
                    reason: format!(
                        "sample position gap: expected {expected}, found {}",
                        f.start_sample
                    ),
                });
            }
            expected += f.length;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_index(lengths: &[i64]) -> AudioTrackIndex {
        let mut frames = Vec::new();
        let mut start = 0;
        for (i, &len) in lengths.iter().enumerate() {
            frames.push(AudioFrameInfo {
                pts: start,
                start_sample: start,
                length: len,
                hash: ContentHash([i as u8; 16]),
            });
            start += len;
        }
        AudioTrackIndex { frames }
    }

    fn video_index(keyframes: &[i64], len: i64) -> VideoTrackIndex {
        let frames = (0..len)
            .map(|i| VideoFrameInfo {
                pts: i * 1001,
                repeat_pict: 0,
                key_frame: keyframes.contains(&i),
                tff: false,
                hash: ContentHash([(i & 0xff) as u8; 16]),
            })
            .collect();
        VideoTrackIndex {
            frames,
            last_frame_duration: 1001,
        }
    }

    // ── Audio ────────────────────────────────────────────────────

    #[test]
    fn num_samples_sums_lengths() {
        let idx = audio_index(&[10, 20, 30]);
        assert_eq!(idx.num_samples(), 60);
        assert_eq!(audio_index(&[]).num_samples(), 0);
    }

    #[test]
    fn frame_from_sample_finds_containing_frame() {
        let idx = audio_index(&[10, 20, 30]);
        assert_eq!(idx.frame_from_sample(0), 0);
        assert_eq!(idx.frame_from_sample(9), 0);
        assert_eq!(idx.frame_from_sample(10), 1);
        assert_eq!(idx.frame_from_sample(29), 1);
        assert_eq!(idx.frame_from_sample(30), 2);
        assert_eq!(idx.frame_from_sample(59), 2);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn frame_from_sample_rejects_out_of_range() {
        let idx = audio_index(&[10]);
        let _ = idx.frame_from_sample(10);
    }

    #[test]
    fn validate_accepts_contiguous() {
        assert!(audio_index(&[10, 20, 30]).validate().is_ok());
        assert!(audio_index(&[]).validate().is_ok());
    }

    #[test]
    fn validate_rejects_gap() {
        let mut idx = audio_index(&[10, 20]);
        idx.frames[1].start_sample = 11;
        assert!(matches!(
            idx.validate(),
            Err(IndexError::Inconsistent { frame: 1, .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_frame() {
        let mut idx = audio_index(&[10, 20]);
        idx.frames[1].length = 0;
        assert!(idx.validate().is_err());
    }

    // ── Video ────────────────────────────────────────────────────

    #[test]
    fn prev_keyframe_walks_back() {
        let idx = video_index(&[0, 10, 20], 30);
        assert_eq!(idx.prev_keyframe(29), Some(20));
        assert_eq!(idx.prev_keyframe(20), Some(20));
        assert_eq!(idx.prev_keyframe(19), Some(10));
        assert_eq!(idx.prev_keyframe(5), Some(0));
        assert_eq!(idx.prev_keyframe(0), Some(0));
    }

    #[test]
    fn prev_keyframe_ignores_unknown_pts() {
        let mut idx = video_index(&[0, 10], 20);
        idx.frames[10].pts = NO_PTS;
        assert_eq!(idx.prev_keyframe(15), Some(0));
    }

    #[test]
    fn prev_keyframe_none_without_candidates() {
        let idx = video_index(&[], 5);
        assert_eq!(idx.prev_keyframe(4), None);
    }
}
