//! Persisted index I/O.
//!
//! A track index is cached next to the source (or at a caller-supplied
//! path) as a versioned little-endian binary record with a CRC32 trailer.
//! The header pins the identity of the source it was built from; on open,
//! a cached index is accepted only if every header field matches the live
//! source exactly. Anything else — wrong magic, wrong version, identity
//! mismatch, truncation, checksum failure — rejects the cache and the
//! caller re-indexes.
//!
//! Writes go through a temporary sibling and a rename, so a crash never
//! leaves a half-written cache behind.

use std::io::Read;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use fl_common::error::CacheError;
use fl_common::hash::ContentHash;
use fl_common::types::MediaType;

use crate::types::{AudioFrameInfo, AudioTrackIndex, VideoFrameInfo, VideoTrackIndex};

pub const INDEX_MAGIC: &[u8; 4] = b"FLI1";
/// Bump on any change to the record layout or the content-hash input.
pub const INDEX_VERSION: u32 = 1;

const VIDEO_RECORD_BYTES: usize = 8 + 4 + 1 + 16;
const AUDIO_RECORD_BYTES: usize = 8 + 8 + 8 + 16;

const FLAG_KEY_FRAME: u8 = 1 << 0;
const FLAG_TFF: u8 = 1 << 1;

/// Identity of the source a cached index belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheIdentity {
    pub source_size: i64,
    /// Unix seconds, 0 when unavailable.
    pub source_mtime: i64,
    /// Resolved absolute track number.
    pub track: i32,
    /// Media-type tag plus the backend's codec parameter fingerprint.
    pub fingerprint: Vec<u8>,
}

impl CacheIdentity {
    pub fn new(
        source_size: i64,
        source_mtime: i64,
        track: i32,
        media: MediaType,
        codec_fingerprint: &[u8],
    ) -> Self {
        let mut fingerprint = Vec::with_capacity(codec_fingerprint.len() + 1);
        fingerprint.push(match media {
            MediaType::Audio => b'a',
            MediaType::Video => b'v',
        });
        fingerprint.extend_from_slice(codec_fingerprint);
        Self {
            source_size,
            source_mtime,
            track,
            fingerprint,
        }
    }
}

/// Modification time of `path` in unix seconds, 0 when unavailable.
pub fn source_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Sidecar cache path used when the caller does not supply one:
/// `<source>.<track>.<a|v>.flidx`.
pub fn default_cache_path(source: &Path, track: i32, media: MediaType) -> PathBuf {
    let tag = match media {
        MediaType::Audio => 'a',
        MediaType::Video => 'v',
    };
    let mut name = source.as_os_str().to_owned();
    name.push(format!(".{track}.{tag}.flidx"));
    PathBuf::from(name)
}

// ── Writing ──────────────────────────────────────────────────────────

pub fn write_video_index(
    path: &Path,
    identity: &CacheIdentity,
    index: &VideoTrackIndex,
) -> Result<(), CacheError> {
    let buf = encode_video_index(identity, index)?;
    finish_and_write(path, buf, index.frames.len())
}

pub fn write_audio_index(
    path: &Path,
    identity: &CacheIdentity,
    index: &AudioTrackIndex,
) -> Result<(), CacheError> {
    let buf = encode_audio_index(identity, index)?;
    finish_and_write(path, buf, index.frames.len())
}

fn encode_video_index(
    identity: &CacheIdentity,
    index: &VideoTrackIndex,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + index.frames.len() * VIDEO_RECORD_BYTES);
    write_header(&mut buf, identity, index.frames.len() as u64)?;
    for f in &index.frames {
        buf.write_i64::<LittleEndian>(f.pts)?;
        buf.write_i32::<LittleEndian>(f.repeat_pict)?;
        let mut flags = 0u8;
        if f.key_frame {
            flags |= FLAG_KEY_FRAME;
        }
        if f.tff {
            flags |= FLAG_TFF;
        }
        buf.push(flags);
        buf.extend_from_slice(f.hash.as_bytes());
    }
    buf.write_i64::<LittleEndian>(index.last_frame_duration)?;
    Ok(buf)
}

fn encode_audio_index(
    identity: &CacheIdentity,
    index: &AudioTrackIndex,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + index.frames.len() * AUDIO_RECORD_BYTES);
    write_header(&mut buf, identity, index.frames.len() as u64)?;
    for f in &index.frames {
        buf.write_i64::<LittleEndian>(f.pts)?;
        buf.write_i64::<LittleEndian>(f.start_sample)?;
        buf.write_i64::<LittleEndian>(f.length)?;
        buf.extend_from_slice(f.hash.as_bytes());
    }
    Ok(buf)
}

fn write_header(
    buf: &mut Vec<u8>,
    identity: &CacheIdentity,
    frame_count: u64,
) -> std::io::Result<()> {
    buf.extend_from_slice(INDEX_MAGIC);
    buf.write_u32::<LittleEndian>(INDEX_VERSION)?;
    buf.write_i64::<LittleEndian>(identity.source_size)?;
    buf.write_i64::<LittleEndian>(identity.source_mtime)?;
    buf.write_i32::<LittleEndian>(identity.track)?;
    buf.write_u32::<LittleEndian>(identity.fingerprint.len() as u32)?;
    buf.extend_from_slice(&identity.fingerprint);
    buf.write_u64::<LittleEndian>(frame_count)?;
    Ok(())
}

fn finish_and_write(path: &Path, mut buf: Vec<u8>, frames: usize) -> Result<(), CacheError> {
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    // Write to a temporary sibling first, then rename for atomicity.
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let temp_path = PathBuf::from(tmp_name);

    std::fs::write(&temp_path, &buf).map_err(|e| {
        tracing::error!(path = %temp_path.display(), error = %e, "Failed to write temp index");
        CacheError::Io(e)
    })?;
    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        tracing::error!(
            from = %temp_path.display(),
            to = %path.display(),
            error = %e,
            "Failed to rename temp index into place"
        );
        CacheError::Io(e)
    })?;

    info!(path = %path.display(), frames, bytes = buf.len(), "Index cache written");
    Ok(())
}

// ── Reading ──────────────────────────────────────────────────────────

pub fn read_video_index(
    path: &Path,
    identity: &CacheIdentity,
) -> Result<VideoTrackIndex, CacheError> {
    let body = read_checked(path)?;
    let mut r = body.as_slice();
    let frame_count = read_header(&mut r, identity, VIDEO_RECORD_BYTES)?;

    let mut frames = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let pts = r.read_i64::<LittleEndian>().map_err(read_err)?;
        let repeat_pict = r.read_i32::<LittleEndian>().map_err(read_err)?;
        let flags = r.read_u8().map_err(read_err)?;
        let mut hash = [0u8; 16];
        r.read_exact(&mut hash).map_err(read_err)?;
        frames.push(VideoFrameInfo {
            pts,
            repeat_pict,
            key_frame: flags & FLAG_KEY_FRAME != 0,
            tff: flags & FLAG_TFF != 0,
            hash: ContentHash(hash),
        });
    }
    let last_frame_duration = r.read_i64::<LittleEndian>().map_err(read_err)?;
    if !r.is_empty() {
        return Err(CacheError::Truncated);
    }

    debug!(path = %path.display(), frames = frames.len(), "Video index cache loaded");
    Ok(VideoTrackIndex {
        frames,
        last_frame_duration,
    })
}

pub fn read_audio_index(
    path: &Path,
    identity: &CacheIdentity,
) -> Result<AudioTrackIndex, CacheError> {
    let body = read_checked(path)?;
    let mut r = body.as_slice();
    let frame_count = read_header(&mut r, identity, AUDIO_RECORD_BYTES)?;

    let mut frames = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let pts = r.read_i64::<LittleEndian>().map_err(read_err)?;
        let start_sample = r.read_i64::<LittleEndian>().map_err(read_err)?;
        let length = r.read_i64::<LittleEndian>().map_err(read_err)?;
        let mut hash = [0u8; 16];
        r.read_exact(&mut hash).map_err(read_err)?;
        frames.push(AudioFrameInfo {
            pts,
            start_sample,
            length,
            hash: ContentHash(hash),
        });
    }
    if !r.is_empty() {
        return Err(CacheError::Truncated);
    }

    debug!(path = %path.display(), frames = frames.len(), "Audio index cache loaded");
    Ok(AudioTrackIndex { frames })
}

/// Read the whole file and verify the CRC32 trailer; returns the body
/// without the trailer.
fn read_checked(path: &Path) -> Result<Vec<u8>, CacheError> {
    let mut data = std::fs::read(path)?;
    if data.len() < 4 {
        return Err(CacheError::Truncated);
    }
    let trailer_at = data.len() - 4;
    let stored = u32::from_le_bytes(data[trailer_at..].try_into().expect("4 bytes"));
    data.truncate(trailer_at);
    if crc32fast::hash(&data) != stored {
        return Err(CacheError::ChecksumMismatch);
    }
    Ok(data)
}

fn read_header(
    r: &mut &[u8],
    identity: &CacheIdentity,
    record_bytes: usize,
) -> Result<usize, CacheError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(read_err)?;
    if &magic != INDEX_MAGIC {
        return Err(CacheError::BadMagic);
    }
    let version = r.read_u32::<LittleEndian>().map_err(read_err)?;
    if version != INDEX_VERSION {
        return Err(CacheError::UnsupportedVersion { found: version });
    }

    let source_size = r.read_i64::<LittleEndian>().map_err(read_err)?;
    if source_size != identity.source_size {
        return Err(CacheError::SourceMismatch {
            field: "source size",
        });
    }
    let source_mtime = r.read_i64::<LittleEndian>().map_err(read_err)?;
    if source_mtime != identity.source_mtime {
        return Err(CacheError::SourceMismatch {
            field: "modification time",
        });
    }
    let track = r.read_i32::<LittleEndian>().map_err(read_err)?;
    if track != identity.track {
        return Err(CacheError::SourceMismatch { field: "track" });
    }
    let fp_len = r.read_u32::<LittleEndian>().map_err(read_err)? as usize;
    let whole = *r;
    if fp_len > whole.len() {
        return Err(CacheError::Truncated);
    }
    let (fp, rest) = whole.split_at(fp_len);
    if fp != identity.fingerprint.as_slice() {
        return Err(CacheError::SourceMismatch {
            field: "codec fingerprint",
        });
    }
    *r = rest;

    let frame_count = r.read_u64::<LittleEndian>().map_err(read_err)? as usize;
    if frame_count.saturating_mul(record_bytes) > r.len() {
        return Err(CacheError::Truncated);
    }
    Ok(frame_count)
}

fn read_err(e: std::io::Error) -> CacheError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        CacheError::Truncated
    } else {
        CacheError::Io(e)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fl_index_persist_{name}"));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn identity() -> CacheIdentity {
        CacheIdentity::new(123456, 777, 2, MediaType::Audio, b"codec:48000:2")
    }

    fn video_identity() -> CacheIdentity {
        CacheIdentity::new(999, 1, 0, MediaType::Video, b"h264")
    }

    fn sample_audio_index() -> AudioTrackIndex {
        let mut frames = Vec::new();
        let mut start = 0;
        for i in 0..20i64 {
            let length = 100 + (i % 3) * 10;
            frames.push(AudioFrameInfo {
                pts: start,
                start_sample: start,
                length,
                hash: ContentHash([(i & 0xff) as u8; 16]),
            });
            start += length;
        }
        AudioTrackIndex { frames }
    }

    fn sample_video_index() -> VideoTrackIndex {
        let frames = (0..20i64)
            .map(|i| VideoFrameInfo {
                pts: i * 1001,
                repeat_pict: (i % 2) as i32,
                key_frame: i % 5 == 0,
                tff: i % 3 == 0,
                hash: ContentHash([(i & 0xff) as u8; 16]),
            })
            .collect();
        VideoTrackIndex {
            frames,
            last_frame_duration: 1001,
        }
    }

    // ── Round trips ──────────────────────────────────────────────

    #[test]
    fn audio_roundtrip() {
        let dir = test_dir("audio_roundtrip");
        let path = dir.join("a.flidx");
        let id = identity();
        let idx = sample_audio_index();

        write_audio_index(&path, &id, &idx).unwrap();
        let loaded = read_audio_index(&path, &id).unwrap();
        assert_eq!(loaded, idx);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn video_roundtrip() {
        let dir = test_dir("video_roundtrip");
        let path = dir.join("v.flidx");
        let id = video_identity();
        let idx = sample_video_index();

        write_video_index(&path, &id, &idx).unwrap();
        let loaded = read_video_index(&path, &id).unwrap();
        assert_eq!(loaded, idx);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_leaves_no_temp_residue() {
        let dir = test_dir("no_residue");
        let path = dir.join("a.flidx");
        write_audio_index(&path, &identity(), &sample_audio_index()).unwrap();

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());

        let _ = std::fs::remove_file(&path);
    }

    // ── Rejections ───────────────────────────────────────────────

    #[test]
    fn flipped_byte_fails_checksum() {
        let dir = test_dir("crc");
        let path = dir.join("a.flidx");
        write_audio_index(&path, &identity(), &sample_audio_index()).unwrap();

        let mut data = std::fs::read(&path).unwrap();
        let mid = data.len() / 2;
        data[mid] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(
            read_audio_index(&path, &identity()),
            Err(CacheError::ChecksumMismatch)
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = test_dir("truncated");
        let path = dir.join("a.flidx");
        write_audio_index(&path, &identity(), &sample_audio_index()).unwrap();

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() / 2]).unwrap();

        // Depending on where the cut lands this shows up as a checksum or
        // length failure; either way the cache is rejected.
        assert!(read_audio_index(&path, &identity()).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn identity_mismatches_are_rejected_per_field() {
        let dir = test_dir("identity");
        let path = dir.join("a.flidx");
        let id = identity();
        write_audio_index(&path, &id, &sample_audio_index()).unwrap();

        let mut wrong = id.clone();
        wrong.source_size += 1;
        assert!(matches!(
            read_audio_index(&path, &wrong),
            Err(CacheError::SourceMismatch {
                field: "source size"
            })
        ));

        let mut wrong = id.clone();
        wrong.source_mtime += 1;
        assert!(matches!(
            read_audio_index(&path, &wrong),
            Err(CacheError::SourceMismatch { .. })
        ));

        let mut wrong = id.clone();
        wrong.track += 1;
        assert!(matches!(
            read_audio_index(&path, &wrong),
            Err(CacheError::SourceMismatch { field: "track" })
        ));

        let wrong = CacheIdentity::new(
            id.source_size,
            id.source_mtime,
            id.track,
            MediaType::Audio,
            b"other-codec",
        );
        assert!(matches!(
            read_audio_index(&path, &wrong),
            Err(CacheError::SourceMismatch {
                field: "codec fingerprint"
            })
        ));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn media_type_tag_separates_caches() {
        let dir = test_dir("media_tag");
        let path = dir.join("x.flidx");
        let id = identity();
        write_audio_index(&path, &id, &sample_audio_index()).unwrap();

        let as_video = CacheIdentity::new(
            id.source_size,
            id.source_mtime,
            id.track,
            MediaType::Video,
            b"codec:48000:2",
        );
        assert!(matches!(
            read_video_index(&path, &as_video),
            Err(CacheError::SourceMismatch { .. })
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = test_dir("magic");
        let path = dir.join("a.flidx");
        let mut buf = b"NOPE".to_vec();
        buf.extend_from_slice(&[0u8; 32]);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        std::fs::write(&path, &buf).unwrap();

        assert!(matches!(
            read_audio_index(&path, &identity()),
            Err(CacheError::BadMagic)
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = test_dir("missing");
        let path = dir.join("does_not_exist.flidx");
        assert!(matches!(
            read_audio_index(&path, &identity()),
            Err(CacheError::Io(_))
        ));
    }

    #[test]
    fn default_cache_path_encodes_track_and_media() {
        let p = default_cache_path(Path::new("/m/file.mkv"), 2, MediaType::Audio);
        assert_eq!(p, PathBuf::from("/m/file.mkv.2.a.flidx"));
        let p = default_cache_path(Path::new("clip.mp4"), 0, MediaType::Video);
        assert_eq!(p, PathBuf::from("clip.mp4.0.v.flidx"));
    }
}
