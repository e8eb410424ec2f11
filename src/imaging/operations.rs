//! Pixel operations used by the thumbnail pipeline.
//!
//! | Operation | Implementation |
//! |---|---|
//! | **Flatten** | front-to-back "over" of premultiplied deep samples |
//! | **Fit** | `image::imageops::resize` with the `Gaussian` filter on `f32` pixels |
//! | **Pad** | edge-replicating copy into a larger canvas |
//!
//! Channel shuffling lives in [`channels`](super::channels) and color
//! conversion in [`color`](super::color).

use super::buffer::PixelBuffer;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum OpError {
    #[error("channel index {index} is out of range for a {channels}-channel image")]
    ChannelOutOfRange { index: usize, channels: usize },
    #[error("image is not deep")]
    NotDeep,
    #[error("deep sample data is malformed at pixel {0}")]
    MalformedDeep(usize),
    #[error("deep images are not supported by {0}")]
    DeepUnsupported(&'static str),
    #[error("cannot resample a {0}-channel image")]
    UnsupportedChannels(usize),
    #[error("invalid dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),
}

/// Collapse deep samples to one value per channel.
///
/// Samples are composited front to back assuming premultiplied color. When a
/// `Z` channel exists samples are ordered by it first; otherwise the stored
/// order is taken as front to back. Without an `A` channel every sample is
/// opaque, so the front sample wins.
pub fn flatten(buffer: &PixelBuffer) -> Result<PixelBuffer, OpError> {
    let pixels = buffer.deep().ok_or(OpError::NotDeep)?;
    let n = buffer.nchannels();
    let alpha = buffer.channel_index("A");
    let depth = buffer.channel_index("Z");
    let (width, height) = buffer.dimensions();
    let mut out = vec![0.0f32; pixels.len() * n];

    for (p, samples) in pixels.iter().enumerate() {
        if samples.len() % n != 0 {
            return Err(OpError::MalformedDeep(p));
        }
        let mut ordered: Vec<&[f32]> = samples.chunks_exact(n).collect();
        if let Some(z) = depth {
            ordered.sort_by(|a, b| a[z].total_cmp(&b[z]));
        }

        let dst = &mut out[p * n..(p + 1) * n];
        let mut coverage = 0.0f32;
        for sample in &ordered {
            let weight = 1.0 - coverage;
            for (c, value) in dst.iter_mut().enumerate() {
                if Some(c) != alpha && Some(c) != depth {
                    *value += weight * sample[c];
                }
            }
            coverage += weight * alpha.map_or(1.0, |a| sample[a].clamp(0.0, 1.0));
            if coverage >= 1.0 {
                break;
            }
        }
        if let Some(a) = alpha {
            dst[a] = coverage;
        }
        if let (Some(z), Some(front)) = (depth, ordered.first()) {
            dst[z] = front[z];
        }
    }

    PixelBuffer::from_flat(width, height, buffer.channel_names(), out)
        .ok_or(OpError::InvalidDimensions(width, height))
}

/// Resample `buffer` into exactly `width` x `height`.
///
/// The region of interest is the full output box: no letterboxing, no crop.
pub fn fit(buffer: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer, OpError> {
    if width == 0 || height == 0 {
        return Err(OpError::InvalidDimensions(width, height));
    }
    let data = buffer
        .flat()
        .ok_or(OpError::DeepUnsupported("resampling"))?;
    let (sw, sh) = buffer.dimensions();
    let resized = match buffer.nchannels() {
        1 => resize_as::<Luma<f32>>(data, (sw, sh), (width, height)),
        2 => resize_as::<LumaA<f32>>(data, (sw, sh), (width, height)),
        3 => resize_as::<Rgb<f32>>(data, (sw, sh), (width, height)),
        4 => resize_as::<Rgba<f32>>(data, (sw, sh), (width, height)),
        n => return Err(OpError::UnsupportedChannels(n)),
    }
    .ok_or(OpError::InvalidDimensions(sw, sh))?;
    PixelBuffer::from_flat(width, height, buffer.channel_names(), resized)
        .ok_or(OpError::InvalidDimensions(width, height))
}

fn resize_as<P>(data: &[f32], source: (u32, u32), target: (u32, u32)) -> Option<Vec<f32>>
where
    P: Pixel<Subpixel = f32> + 'static,
{
    let img: ImageBuffer<P, Vec<f32>> = ImageBuffer::from_raw(source.0, source.1, data.to_vec())?;
    Some(imageops::resize(&img, target.0, target.1, FilterType::Gaussian).into_raw())
}

/// Copy `buffer` into a `width` x `height` canvas anchored top-left, repeating
/// the last column and row into the added area. Used when only even-rounding
/// changed the box and the pixels must not be resampled.
///
/// See "Preserve (-1) with mips" under Open Question decisions in DESIGN.md.
pub fn pad_to(buffer: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer, OpError> {
    let data = buffer.flat().ok_or(OpError::DeepUnsupported("padding"))?;
    let (sw, sh) = buffer.dimensions();
    if sw == 0 || sh == 0 || width < sw || height < sh {
        return Err(OpError::InvalidDimensions(width, height));
    }
    let n = buffer.nchannels();
    let mut out = Vec::with_capacity(width as usize * height as usize * n);
    for y in 0..height {
        let sy = y.min(sh - 1) as usize;
        for x in 0..width {
            let sx = x.min(sw - 1) as usize;
            let start = (sy * sw as usize + sx) * n;
            out.extend_from_slice(&data[start..start + n]);
        }
    }
    PixelBuffer::from_flat(width, height, buffer.channel_names(), out)
        .ok_or(OpError::InvalidDimensions(width, height))
}
