//! Track indexing — one full pass over every packet of a track.
//!
//! Indexing drives a fresh decoder cursor from open to end of stream and
//! records the per-frame metadata random access depends on. Progress is
//! reported between frames as bytes consumed out of the total source
//! size, and the callback can cancel the pass.

use tracing::{debug, info};

use fl_adapter::cursor::{AudioCursor, VideoCursor};
use fl_common::error::IndexError;
use fl_common::frame::DecodedFrame;
use fl_common::progress::{Progress, ProgressControl, ProgressReport};

use crate::types::{AudioFrameInfo, AudioTrackIndex, VideoFrameInfo, VideoTrackIndex};

/// Index an audio track from start to finish.
///
/// # Panics
///
/// Panics if the cursor has already decoded or seeked.
pub fn index_audio_track(
    cursor: &mut AudioCursor,
    mut progress: Option<Progress<'_>>,
) -> Result<AudioTrackIndex, IndexError> {
    assert!(
        cursor.current_frame() == 0 && !cursor.has_seeked(),
        "indexing requires a fresh cursor"
    );
    let track = cursor.track();
    let total = cursor.source_size();
    let mut frames: Vec<AudioFrameInfo> = Vec::new();
    let mut start_sample = 0i64;

    while let Some(frame) = cursor.next_frame()? {
        if frame.num_samples <= 0 {
            return Err(IndexError::Inconsistent {
                frame: frames.len() as i64,
                reason: format!("decoder produced {} samples", frame.num_samples),
            });
        }
        frames.push(AudioFrameInfo {
            pts: frame.pts,
            start_sample,
            length: frame.num_samples,
            hash: frame.content_hash(),
        });
        start_sample += frame.num_samples;

        if report(&mut progress, track, cursor.position(), total) == ProgressControl::Cancel {
            debug!(track, frames = frames.len(), "Audio indexing cancelled");
            return Err(IndexError::Cancelled);
        }
    }

    if frames.is_empty() {
        return Err(IndexError::Inconsistent {
            frame: 0,
            reason: "track produced no frames".into(),
        });
    }

    info!(
        track,
        frames = frames.len(),
        samples = start_sample,
        "Audio track indexed"
    );
    Ok(AudioTrackIndex { frames })
}

/// Index a video track from start to finish.
///
/// # Panics
///
/// Panics if the cursor has already decoded or seeked.
pub fn index_video_track(
    cursor: &mut VideoCursor,
    mut progress: Option<Progress<'_>>,
) -> Result<VideoTrackIndex, IndexError> {
    assert!(
        cursor.current_frame() == 0 && !cursor.has_seeked(),
        "indexing requires a fresh cursor"
    );
    let track = cursor.track();
    let total = cursor.source_size();
    let mut frames: Vec<VideoFrameInfo> = Vec::new();

    while let Some(frame) = cursor.next_frame()? {
        frames.push(VideoFrameInfo {
            pts: frame.pts,
            repeat_pict: frame.repeat_pict,
            key_frame: frame.key_frame,
            tff: frame.tff,
            hash: frame.content_hash(),
        });

        if report(&mut progress, track, cursor.position(), total) == ProgressControl::Cancel {
            debug!(track, frames = frames.len(), "Video indexing cancelled");
            return Err(IndexError::Cancelled);
        }
    }

    if frames.is_empty() {
        return Err(IndexError::Inconsistent {
            frame: 0,
            reason: "track produced no frames".into(),
        });
    }

    let last_frame_duration = last_frame_duration(&frames);

    info!(track, frames = frames.len(), "Video track indexed");
    Ok(VideoTrackIndex {
        frames,
        last_frame_duration,
    })
}

fn report(
    progress: &mut Option<Progress<'_>>,
    track: i32,
    current: i64,
    total: i64,
) -> ProgressControl {
    match progress {
        Some(cb) => cb(ProgressReport {
            track,
            current,
            total,
        }),
        None => ProgressControl::Continue,
    }
}

/// The final frame's duration is unknowable from packets alone; use the
/// last PTS step, floored at one tick.
fn last_frame_duration(frames: &[VideoFrameInfo]) -> i64 {
    if frames.len() >= 2 {
        (frames[frames.len() - 1].pts - frames[frames.len() - 2].pts).max(1)
    } else {
        1
    }
}

// ── Tests ────────────────────────────────────────────────────────────
