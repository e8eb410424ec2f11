//! Image decoding/encoding backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the only way the rest of the crate touches
//! image files: query a specification for a `(subimage, miplevel)` pair, read
//! that pair as float pixels, and write a pixel buffer back out as UINT8 with
//! a set of string attributes. The conversion logic never handles encoded
//! bytes itself.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use the
//! `MockBackend` defined below, which can describe sources the pure-Rust
//! decoders never produce (mip chains, deep data).

use super::buffer::PixelBuffer;
use super::params::WriteParams;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Encode failed: {0}")]
    Encode(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Per-channel storage format reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    U16,
    F32,
}

/// A free-form metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Str(v) => f.write_str(v),
        }
    }
}

/// Description of one `(subimage, miplevel)` pair of a source image.
///
/// A specification is a snapshot: looking at another subimage or mip level
/// requires another call to [`ImageBackend::spec`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    pub channel_names: Vec<String>,
    pub format: SampleFormat,
    /// Multiple depth-ordered samples per pixel.
    pub deep: bool,
    /// Number of subimages (frames of a multi-frame container).
    pub subimages: u32,
    /// Number of mip levels stored for this subimage.
    pub miplevels: u32,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl ImageSpec {
    pub fn new(width: u32, height: u32, channel_names: &[&str]) -> Self {
        Self {
            width,
            height,
            channel_names: channel_names.iter().map(|c| c.to_string()).collect(),
            format: SampleFormat::U8,
            deep: false,
            subimages: 1,
            miplevels: 1,
            attributes: BTreeMap::new(),
        }
    }

    pub fn nchannels(&self) -> usize {
        self.channel_names.len()
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channel_names.iter().position(|c| c == name)
    }

    /// String view of an attribute; integers are rendered in decimal.
    pub fn string_attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).map(|v| v.to_string())
    }

    pub fn int_attribute(&self, name: &str) -> Option<i64> {
        match self.attributes.get(name)? {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: AttrValue) {
        self.attributes.insert(name.into(), value);
    }

    /// Detailed, human-readable dump used by verbose progress output.
    pub fn describe(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Trait for image decode/encode backends.
///
/// Implementations must be `Sync`: sequence workers share one backend.
pub trait ImageBackend: Sync {
    /// Whether `path` looks like something this backend can decode.
    fn supports(&self, path: &Path) -> bool;

    /// Read the specification at `(subimage, miplevel)`.
    ///
    /// Returns `Ok(None)` when the pair does not exist in the file.
    fn spec(
        &self,
        path: &Path,
        subimage: u32,
        miplevel: u32,
    ) -> Result<Option<ImageSpec>, BackendError>;

    /// Decode the pixels at `(subimage, miplevel)` into a float buffer.
    fn read(&self, path: &Path, subimage: u32, miplevel: u32)
    -> Result<PixelBuffer, BackendError>;

    /// Encode `buffer` to `path` as UINT8 with the attributes in `params`.
    fn write(
        &self,
        path: &Path,
        buffer: &PixelBuffer,
        params: &WriteParams,
    ) -> Result<(), BackendError>;
}
