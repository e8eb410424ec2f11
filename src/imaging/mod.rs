//! Image processing, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Spec read / decode** | `image` crate decoders behind [`ImageBackend`] |
//! | **Channel shuffle** | [`ChannelMapping::apply`] (rayon over pixels) |
//! | **Deep flatten** | [`operations::flatten`] |
//! | **Resize** | `image::imageops::resize`, Gaussian filter, `f32` pixels |
//! | **Color convert** | [`color::colorconvert`] (transfer functions) |
//! | **Encode + stamp** | `png::Encoder` text chunks, `image` for other formats |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for mip selection and output geometry (unit testable)
//! - **Parameters**: Data structures describing what to produce
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Buffer / channels / color / operations**: pixel transforms used by the pipeline

pub mod backend;
pub mod buffer;
pub mod calculations;
pub mod channels;
pub mod color;
pub mod operations;
pub mod params;
pub mod rust_backend;

pub use backend::{AttrValue, BackendError, ImageBackend, ImageSpec, SampleFormat};
pub use buffer::PixelBuffer;
pub use channels::{ChannelMapping, ChannelSource};
pub use operations::OpError;
pub use params::{
    COLOR_SPACE_ATTR, SOURCE_PATH_ATTR, SOURCE_SIZE_ATTR, STAMP_TIME_ATTR, TargetSize, WriteParams,
};
pub use rust_backend::{RustBackend, supported_input_extensions};
