//! Channel remapping to the canonical `R G B A` layout.
//!
//! Source channels are matched by name:
//!
//! | Output | Source names |
//! |---|---|
//! | R | `R`, `Y`, `L`, `RY` |
//! | G | `G` |
//! | B | `B` |
//! | A | `A` |
//!
//! The first matching source channel wins. Unmatched R/G/B read the source's
//! first channel, so a `Y A` image becomes grayscale RGB with its alpha kept.
//! An unmatched A, or any output when the source has no channels at all, is
//! filled with a constant.
//!
//! Alpha is always kept here so deep samples composite correctly; encoders
//! that cannot store it drop it at write time.

use super::buffer::PixelBuffer;
use super::operations::OpError;
use rayon::prelude::*;

/// Fill used for a missing color channel: mid gray rather than black.
pub const FILL_COLOR: f32 = 0.3;
/// Fill used for a missing alpha channel: fully opaque.
pub const FILL_ALPHA: f32 = 1.0;

const RGBA: [&str; 4] = ["R", "G", "B", "A"];

/// Where one output channel gets its value from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelSource {
    Index(usize),
    Fill(f32),
}

/// Source assignment for each canonical output channel, `R G B A`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMapping {
    sources: Vec<ChannelSource>,
}

impl ChannelMapping {
    /// Build the mapping from a specification's channel names.
    pub fn from_channel_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut r = None;
        let mut g = None;
        let mut b = None;
        let mut a = None;
        for (i, name) in names.iter().enumerate() {
            let slot = match name.as_ref() {
                "R" | "Y" | "L" | "RY" => &mut r,
                "G" => &mut g,
                "B" => &mut b,
                "A" => &mut a,
                _ => continue,
            };
            slot.get_or_insert(i);
        }

        let color = |found: Option<usize>| match (found, names.is_empty()) {
            (Some(i), _) => ChannelSource::Index(i),
            (None, false) => ChannelSource::Index(0),
            (None, true) => ChannelSource::Fill(FILL_COLOR),
        };
        let alpha = a.map_or(ChannelSource::Fill(FILL_ALPHA), ChannelSource::Index);
        Self {
            sources: vec![color(r), color(g), color(b), alpha],
        }
    }

    pub fn sources(&self) -> &[ChannelSource] {
        &self.sources
    }

    pub fn output_names(&self) -> &'static [&'static str] {
        &RGBA
    }

    /// Shuffle `buffer` into the canonical layout. Works on flat and deep
    /// buffers; deep samples are remapped one by one.
    pub fn apply(&self, buffer: &PixelBuffer) -> Result<PixelBuffer, OpError> {
        let channels = buffer.nchannels();
        for source in &self.sources {
            if let ChannelSource::Index(index) = *source
                && index >= channels
            {
                return Err(OpError::ChannelOutOfRange { index, channels });
            }
        }

        let (width, height) = buffer.dimensions();
        let out_n = self.sources.len();

        if let Some(pixels) = buffer.deep() {
            let mut shuffled = Vec::with_capacity(pixels.len());
            for (p, samples) in pixels.iter().enumerate() {
                if samples.len() % channels != 0 {
                    return Err(OpError::MalformedDeep(p));
                }
                let mut out = Vec::with_capacity(samples.len() / channels * out_n);
                for sample in samples.chunks_exact(channels) {
                    out.extend(self.sources.iter().map(|s| pick(*s, sample)));
                }
                shuffled.push(out);
            }
            return PixelBuffer::from_deep(width, height, self.output_names(), shuffled)
                .ok_or(OpError::InvalidDimensions(width, height));
        }

        let src = buffer.flat().ok_or(OpError::DeepUnsupported("shuffle"))?;
        let mut out = vec![0.0f32; width as usize * height as usize * out_n];
        out.par_chunks_mut(out_n)
            .zip(src.par_chunks(channels))
            .for_each(|(dst, pixel)| {
                for (value, source) in dst.iter_mut().zip(&self.sources) {
                    *value = pick(*source, pixel);
                }
            });
        PixelBuffer::from_flat(width, height, self.output_names(), out)
            .ok_or(OpError::InvalidDimensions(width, height))
    }
}

fn pick(source: ChannelSource, pixel: &[f32]) -> f32 {
    match source {
        ChannelSource::Index(i) => pixel[i],
        ChannelSource::Fill(v) => v,
    }
}
