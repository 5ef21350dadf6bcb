//! Core types shared across the engine.
//!
//! Frame indices and presentation timestamps are plain `i64` throughout,
//! matching the container domain they come from. `NO_PTS` marks a missing
//! timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel for an unknown or absent presentation timestamp.
pub const NO_PTS: i64 = i64::MIN;

/// Rational number for time bases, frame rates, and aspect ratios
/// (e.g. 1001/30000 for the NTSC time base).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FPS_24: Self = Self { num: 24, den: 1 };
    pub const FPS_25: Self = Self { num: 25, den: 1 };
    pub const FPS_30: Self = Self { num: 30, den: 1 };
    pub const FPS_29_97: Self = Self {
        num: 30000,
        den: 1001,
    };

    /// # Panics
    ///
    /// Panics if `den` is zero.
    pub fn new(num: u32, den: u32) -> Self {
        assert!(den > 0, "Rational denominator must be > 0");
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Interpret `pts` ticks of this time base as seconds.
    pub fn pts_to_seconds(self, pts: i64) -> f64 {
        pts as f64 * self.num as f64 / self.den as f64
    }

    /// Convert seconds to ticks of this time base, rounding to nearest.
    pub fn seconds_to_pts(self, seconds: f64) -> i64 {
        (seconds * self.den as f64 / self.num as f64).round() as i64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Media type of a container track.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => write!(f, "audio"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

/// Which track of a container to open.
///
/// In the raw integer form used by most front ends, a non-negative number
/// is an absolute container track and a negative number selects the nth
/// track of the requested media type (`-1` = first, `-2` = second, ...).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackSelector {
    /// Absolute container track number.
    Absolute(i32),
    /// The nth track of the requested media type, zero-based.
    NthOfType(u32),
}

impl TrackSelector {
    /// Decode the conventional integer form.
    pub fn from_raw(raw: i32) -> Self {
        if raw >= 0 {
            TrackSelector::Absolute(raw)
        } else {
            TrackSelector::NthOfType((-(raw as i64) - 1) as u32)
        }
    }

    /// Encode back to the conventional integer form.
    pub fn to_raw(self) -> i32 {
        match self {
            TrackSelector::Absolute(t) => t,
            TrackSelector::NthOfType(n) => -(n as i32) - 1,
        }
    }
}

impl Default for TrackSelector {
    /// First track of the requested media type.
    fn default() -> Self {
        TrackSelector::NthOfType(0)
    }
}

impl fmt::Display for TrackSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSelector::Absolute(t) => write!(f, "track {t}"),
            TrackSelector::NthOfType(n) => write!(f, "{}th track of type", n + 1),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
