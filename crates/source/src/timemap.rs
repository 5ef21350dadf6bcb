//! Time ↔ frame mapping and timecode export.

use std::io::Write;
use std::path::Path;

use fl_common::types::Rational;
use fl_index::types::VideoTrackIndex;

/// Frame whose presentation interval contains `seconds`: the last frame
/// starting at or before the requested time, clamped into range.
///
/// # Panics
///
/// Panics if the index is empty.
pub(crate) fn frame_for_time(index: &VideoTrackIndex, time_base: Rational, seconds: f64) -> i64 {
    assert!(!index.is_empty(), "time lookup needs a non-empty index");
    let at_or_before = index
        .frames
        .partition_point(|f| time_base.pts_to_seconds(f.pts) <= seconds);
    (at_or_before as i64 - 1).max(0)
}

/// Write a `# timecode format v2` file: one millisecond timestamp per
/// display frame, ascending.
pub(crate) fn write_timecodes_v2(
    path: &Path,
    timestamps_ms: impl IntoIterator<Item = f64>,
) -> std::io::Result<()> {
    let mut out = String::from("# timecode format v2\n");
    for ms in timestamps_ms {
        // Millisecond precision is not enough for NTSC rates; keep six
        // fractional digits.
        out.push_str(&format!("{ms:.6}\n"));
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(out.as_bytes())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fl_common::hash::ContentHash;
    use fl_index::types::VideoFrameInfo;

    fn index(len: i64, step: i64) -> VideoTrackIndex {
        let frames = (0..len)
            .map(|i| VideoFrameInfo {
                pts: i * step,
                repeat_pict: 0,
                key_frame: true,
                tff: false,
                hash: ContentHash::ZERO,
            })
            .collect();
        VideoTrackIndex {
            frames,
            last_frame_duration: step,
        }
    }

    #[test]
    fn time_zero_is_frame_zero() {
        let idx = index(10, 1001);
        let tb = Rational::new(1, 30000);
        assert_eq!(frame_for_time(&idx, tb, 0.0), 0);
    }

    #[test]
    fn mid_interval_times_stay_on_frame() {
        let idx = index(10, 1001);
        let tb = Rational::new(1, 30000);
        // Frame 3 starts at 3·1001/30000 ≈ 0.1001 s.
        assert_eq!(frame_for_time(&idx, tb, 0.1001), 3);
        assert_eq!(frame_for_time(&idx, tb, 0.13), 3);
        assert_eq!(frame_for_time(&idx, tb, 0.1335), 4);
    }

    #[test]
    fn times_clamp_to_range() {
        let idx = index(10, 1001);
        let tb = Rational::new(1, 30000);
        assert_eq!(frame_for_time(&idx, tb, -5.0), 0);
        assert_eq!(frame_for_time(&idx, tb, 1e9), 9);
    }

    #[test]
    fn timecode_file_has_header_and_ascending_lines() {
        let dir = std::env::temp_dir().join("fl_source_timecodes");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("tc.txt");

        write_timecodes_v2(&path, (0..5).map(|i| i as f64 * 33.366667)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# timecode format v2"));
        let values: Vec<f64> = lines.map(|l| l.parse().unwrap()).collect();
        assert_eq!(values.len(), 5);
        assert!(values.windows(2).all(|w| w[0] < w[1]));

        let _ = std::fs::remove_file(&path);
    }
}
