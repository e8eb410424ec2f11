//! Parameter types for conversions.
//!
//! These describe *what* to produce, not *how*: [`TargetSize`] is the caller's
//! size request and [`WriteParams`] is everything the encoder needs besides
//! pixels.
//!
//! ## Provenance attributes
//!
//! Every output is stamped with three attributes under the `bookmarks`
//! namespace plus a forced color space:
//!
//! | Attribute | Value |
//! |---|---|
//! | `bookmarks:SourceSize` | source byte size, decimal |
//! | `bookmarks:SourcePath` | source path as given |
//! | `bookmarks:StampTime` | seconds since the Unix epoch |
//! | `ColorSpace` | always `sRGB` |

use super::backend::SampleFormat;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SOURCE_SIZE_ATTR: &str = "bookmarks:SourceSize";
pub const SOURCE_PATH_ATTR: &str = "bookmarks:SourcePath";
pub const STAMP_TIME_ATTR: &str = "bookmarks:StampTime";
pub const COLOR_SPACE_ATTR: &str = "ColorSpace";

/// Requested output size.
///
/// The raw integer convention (CLI `--size`) is `0` for [`Native`](Self::Native),
/// `-1` for [`Preserve`](Self::Preserve) and any positive value for
/// [`LongEdge`](Self::LongEdge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetSize {
    /// Use the source's longer edge as the target edge.
    #[default]
    Native,
    /// Keep the exact source pixel dimensions (rounded up to even).
    Preserve,
    /// Fit the longer edge to this many pixels.
    LongEdge(u32),
}

impl TargetSize {
    /// Replace [`Native`](Self::Native) by the source's longer edge.
    pub fn resolve(self, width: u32, height: u32) -> Self {
        match self {
            TargetSize::Native => TargetSize::LongEdge(width.max(height)),
            other => other,
        }
    }
}

impl TryFrom<i64> for TargetSize {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TargetSize::Native),
            -1 => Ok(TargetSize::Preserve),
            v if v > 0 && v <= u32::MAX as i64 => Ok(TargetSize::LongEdge(v as u32)),
            v => Err(format!("invalid size {v}: expected -1, 0 or a positive edge length")),
        }
    }
}

/// Everything the encoder needs besides pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteParams {
    pub format: SampleFormat,
    pub attributes: BTreeMap<String, String>,
}

impl WriteParams {
    /// UINT8 output carrying only the provenance attributes. Anything the
    /// source carried (ICC profiles, codec tags) is left behind.
    pub fn stamped(source: &Path, source_size: u64, stamp_time: SystemTime) -> Self {
        let seconds = stamp_time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut attributes = BTreeMap::new();
        attributes.insert(COLOR_SPACE_ATTR.to_string(), "sRGB".to_string());
        attributes.insert(SOURCE_SIZE_ATTR.to_string(), source_size.to_string());
        attributes.insert(
            SOURCE_PATH_ATTR.to_string(),
            source.to_string_lossy().to_string(),
        );
        attributes.insert(STAMP_TIME_ATTR.to_string(), seconds.to_string());
        Self {
            format: SampleFormat::U8,
            attributes,
        }
    }
}
