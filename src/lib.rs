//! # Bookmarks imageutil
//!
//! Thumbnail and proxy conversion for the Bookmarks asset browser. Given a
//! source image (an EXR plate, a TIFF scan, a PNG render) it writes a small,
//! 8-bit, display-ready copy stamped with where it came from, so the browser
//! can tell later whether the copy is still current.
//!
//! # Architecture: One Pipeline, Two Drivers
//!
//! ```text
//! single file   shot.exr          ─┐
//!                                  ├─ lock ─ Converter::convert ─ unlock
//! sequence      shot.%04d.exr ─ plan ─ partition ─ workers ─┘
//! ```
//!
//! [`thumbnail::Converter`] is the pipeline. It knows nothing about locks or
//! sequences; it turns one request into one output file or one reported
//! error. [`sequence`] fans a whole frame range out over a worker pool and
//! wraps every item in a lock, a conversion and a release. The binary does
//! the same for a single file.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`thumbnail`] | The conversion pipeline: mip choice, channel shuffle, resize, color, stamp, verify |
//! | [`sequence`] | Expands a frame pattern and converts every frame on a worker pool |
//! | [`pattern`] | `%04d` / `####` frame tokens → anchored sibling regex |
//! | [`locks`] | `<file>.lock` markers with age-based reclaim |
//! | [`staleness`] | Compares an output's stamped source size with the source |
//! | [`diagnostics`] | Progress / warning / error sink the core reports through |
//! | [`cache`] | Decoded-image cache shared by every conversion of a run |
//! | [`config`] | Optional TOML config: cache budget, thread cap, lock age, naming |
//! | [`imaging`] | Pure-Rust decode, pixel operations and encode |
//!
//! # Design Decisions
//!
//! ## Pure-Rust Imaging
//!
//! Decoding and encoding go through the `image` and `png` crates behind the
//! [`imaging::ImageBackend`] trait. There is no system image library to
//! install, and tests swap in a mock backend to exercise things the pure-Rust
//! decoders never produce (mip chains, deep samples).
//!
//! ## Errors Are Reported, Then Returned
//!
//! Every failure that leaves [`thumbnail::Converter::convert`] has already
//! been sent to the [`diagnostics::Diagnostics`] sink with its path and
//! cause. Callers decide what to do with the `Err`; they never need to print
//! it. Non-fatal problems (deep flatten, color conversion) become warnings
//! and the pipeline carries on with the last good pixels.
//!
//! ## Explicit Cache
//!
//! The decode cache is a value the caller creates and passes in, not a
//! process global. A run owns one [`cache::ImageCache`]; the pipeline
//! invalidates its input and output on every exit path.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod imaging;
pub mod locks;
pub mod pattern;
pub mod sequence;
pub mod staleness;
pub mod thumbnail;

#[cfg(test)]
pub(crate) mod test_helpers;
