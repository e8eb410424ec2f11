//! Single-file conversion: any supported source to a small sRGB UINT8 proxy.
//!
//! [`Converter::convert`] runs the stages below in a fixed order. Each stage
//! either advances or fails the conversion; two stages only warn.
//!
//! | # | Stage | On failure |
//! |---|---|---|
//! | 1 | input exists, is a file, has a decodable extension | fail |
//! | 2 | read specification at subimage 0, mip 0 | fail |
//! | 3 | resolve target size (`Native` becomes the longer edge) | n/a |
//! | 4 | pick the tightest mip level not smaller than the target | n/a |
//! | 5 | pick the middle subimage of multi-frame sources and decode it | fail |
//! | 6 | shuffle channels to `R G B [A]` | fail |
//! | 7 | flatten deep data | warn, keep going |
//! | 8 | resize to even output dimensions | fail |
//! | 9 | color convert to the target space | warn, keep going |
//! | 10 | stamp provenance attributes, write UINT8 | fail |
//! | 11 | re-stat the output; delete it if missing or empty | fail |
//!
//! Every failure is reported to the diagnostic sink before it is returned,
//! and both the input and the output are dropped from the decode cache on
//! every exit path.
//!
//! ## Size modes
//!
//! - [`TargetSize::Native`]: the target edge is the source's longer edge.
//!   The image is only resampled if even-rounding changes its dimensions.
//! - [`TargetSize::LongEdge`]: the longer edge becomes the target, the
//!   shorter one follows the aspect ratio.
//! - [`TargetSize::Preserve`]: the mip-0 pixels are kept as they are. Odd
//!   edges are padded by one replicated row or column, never resampled.

use crate::cache::ImageCache;
use crate::diagnostics::{Diagnostics, Reporter};
use crate::imaging::calculations::{output_dimensions, representative_subimage, select_miplevel};
use crate::imaging::channels::{ChannelMapping, ChannelSource};
use crate::imaging::color::{colorconvert, same_color_space};
use crate::imaging::operations::{fit, flatten, pad_to};
use crate::imaging::{
    AttrValue, BackendError, COLOR_SPACE_ATTR, ImageBackend, ImageSpec, OpError, PixelBuffer,
    TargetSize, WriteParams,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Color space assumed when neither the request nor the file names one.
pub const DEFAULT_COLOR_SPACE: &str = "sRGB";

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Does not look like a file: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("Unsupported file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("Could not open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
    #[error("{} contains no image", .0.display())]
    NoImage(PathBuf),
    #[error("Error reading image {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
    #[error("Error reading subimage {subimage} of {}: {source}", path.display())]
    Subimage {
        path: PathBuf,
        subimage: u32,
        #[source]
        source: BackendError,
    },
    #[error("Could not shuffle channels of {}: {source}", path.display())]
    Shuffle {
        path: PathBuf,
        #[source]
        source: OpError,
    },
    #[error("Could not resize {}: {source}", path.display())]
    Resize {
        path: PathBuf,
        #[source]
        source: OpError,
    },
    #[error("Could not write output {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
    #[error("Malformed output file {} was removed", path.display())]
    MalformedOutput {
        path: PathBuf,
        #[source]
        cause: Option<BackendError>,
    },
    #[error("Could not remove malformed output file {}: {source}", path.display())]
    MalformedOutputNotRemoved {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConvertError {
    /// Headline, subject path and detail, as shown in an error block.
    fn parts(&self) -> (&'static str, &Path, Option<String>) {
        use ConvertError::*;
        match self {
            InputNotFound(p) => ("Does not look like a file", p, None),
            UnsupportedFormat(p) => ("Unsupported file format", p, None),
            Open { path, source } => ("Could not open file", path, Some(source.to_string())),
            NoImage(p) => ("Could not open file", p, Some("no image at subimage 0".into())),
            Read { path, source } => ("Error reading image", path, Some(source.to_string())),
            Subimage { path, source, .. } => {
                ("Error resetting subimage", path, Some(source.to_string()))
            }
            Shuffle { path, source } => {
                ("Could not shuffle channels", path, Some(source.to_string()))
            }
            Resize { path, source } => ("Could not resize image", path, Some(source.to_string())),
            Write { path, source } => ("Could not write output", path, Some(source.to_string())),
            MalformedOutput { path, cause } => (
                "Malformed output file, removed",
                path,
                cause.as_ref().map(ToString::to_string),
            ),
            MalformedOutputNotRemoved { path, source } => (
                "Could not remove malformed output file",
                path,
                Some(source.to_string()),
            ),
        }
    }
}

/// One conversion job. Empty color-space strings count as unset.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Override for the source color space; otherwise the file's
    /// `ColorSpace` attribute, otherwise sRGB.
    pub source_color_space: Option<String>,
    /// Target color space; sRGB when unset.
    pub target_color_space: Option<String>,
    pub size: TargetSize,
    /// Pixel-work threads: 0 or 1 run on the calling thread's pool, more
    /// build a dedicated pool for this conversion.
    pub threads: usize,
    pub verbose: bool,
    /// Fixed stamp time, for reproducible output. Defaults to now.
    pub stamp_time: Option<SystemTime>,
}

impl ConvertRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            source_color_space: None,
            target_color_space: None,
            size: TargetSize::Native,
            threads: 0,
            verbose: false,
            stamp_time: None,
        }
    }

    fn source_space(&self, spec: &ImageSpec) -> String {
        non_empty(&self.source_color_space)
            .map(str::to_string)
            .or_else(|| spec.string_attribute(COLOR_SPACE_ATTR))
            .unwrap_or_else(|| DEFAULT_COLOR_SPACE.to_string())
    }

    fn target_space(&self) -> &str {
        non_empty(&self.target_color_space).unwrap_or(DEFAULT_COLOR_SPACE)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// What a successful conversion produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertSummary {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub miplevel: u32,
    pub subimage: u32,
}

/// Drops both paths from the cache however the conversion ends.
struct InvalidateOnExit<'a> {
    cache: &'a ImageCache,
    paths: [&'a Path; 2],
}

impl Drop for InvalidateOnExit<'_> {
    fn drop(&mut self) {
        for path in self.paths {
            self.cache.invalidate(path);
        }
    }
}

/// Runs conversions against one backend, cache and sink.
pub struct Converter<'a, B: ImageBackend + ?Sized> {
    backend: &'a B,
    cache: &'a ImageCache,
    sink: &'a dyn Diagnostics,
}

impl<'a, B: ImageBackend + ?Sized> Converter<'a, B> {
    pub fn new(backend: &'a B, cache: &'a ImageCache, sink: &'a dyn Diagnostics) -> Self {
        Self {
            backend,
            cache,
            sink,
        }
    }

    pub fn sink(&self) -> &'a dyn Diagnostics {
        self.sink
    }

    /// Convert `request.input` to `request.output`.
    pub fn convert(&self, request: &ConvertRequest) -> Result<ConvertSummary, ConvertError> {
        let reporter = Reporter::new(self.sink, request.verbose);
        let _invalidate = InvalidateOnExit {
            cache: self.cache,
            paths: [&request.input, &request.output],
        };

        let stages = || self.run(request, &reporter);
        let result = if request.threads > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(request.threads)
                .build()
            {
                Ok(pool) => pool.install(stages),
                Err(e) => {
                    tracing::warn!(error = %e, "could not build thread pool, converting inline");
                    stages()
                }
            }
        } else {
            stages()
        };

        if let Err(e) = &result {
            let (headline, path, detail) = e.parts();
            reporter.error(headline, path, detail.as_deref());
        }
        result
    }

    fn run(
        &self,
        request: &ConvertRequest,
        reporter: &Reporter<'_>,
    ) -> Result<ConvertSummary, ConvertError> {
        let input = request.input.as_path();
        if !input.is_file() {
            return Err(ConvertError::InputNotFound(input.to_path_buf()));
        }
        if !self.backend.supports(input) {
            return Err(ConvertError::UnsupportedFormat(input.to_path_buf()));
        }

        let spec = self
            .cache
            .spec(self.backend, input, 0, 0)
            .map_err(|source| ConvertError::Open {
                path: input.to_path_buf(),
                source,
            })?
            .ok_or_else(|| ConvertError::NoImage(input.to_path_buf()))?;
        reporter.progress("Input specs:");
        if reporter.verbose() {
            reporter.progress(spec.describe());
        }

        let target = request.size.resolve(spec.width, spec.height);
        let (miplevel, level_spec) = self.choose_miplevel(input, target, &spec, reporter)?;

        let subimage = representative_subimage(level_spec.subimages);
        if subimage != 0 {
            reporter.progress(format!("Resetting subimage to {subimage}"));
        }
        let pixels = self
            .cache
            .pixels(self.backend, input, subimage, miplevel)
            .map_err(|source| match subimage {
                0 => ConvertError::Read {
                    path: input.to_path_buf(),
                    source,
                },
                _ => ConvertError::Subimage {
                    path: input.to_path_buf(),
                    subimage,
                    source,
                },
            })?;

        let mapping = ChannelMapping::from_channel_names(pixels.channel_names());
        for (out, source) in mapping.output_names().iter().zip(mapping.sources()) {
            if let ChannelSource::Index(i) = source
                && let Some(name) = pixels.channel_names().get(*i)
            {
                reporter.progress(format!("{out} channel from: {name}"));
            }
        }
        reporter.progress("Shuffling channels...");
        let mut buffer = mapping
            .apply(&pixels)
            .map_err(|source| ConvertError::Shuffle {
                path: input.to_path_buf(),
                source,
            })?;
        drop(pixels);

        if buffer.is_deep() {
            reporter.progress("Flattening deep image...");
            match flatten(&buffer) {
                Ok(flat) => buffer = flat,
                Err(e) => reporter.warning_at(
                    "Could not flatten deep image. Continuing...",
                    input,
                    Some(&e.to_string()),
                ),
            }
        }

        let (out_w, out_h) = output_dimensions(target, buffer.dimensions());
        if (out_w, out_h) != buffer.dimensions() {
            let resized = if target == TargetSize::Preserve {
                reporter.progress(format!("Padding image...({out_w}x{out_h})"));
                pad_to(&buffer, out_w, out_h)
            } else {
                reporter.progress(format!("Resizing image...({out_w}x{out_h})"));
                fit(&buffer, out_w, out_h)
            };
            buffer = resized.map_err(|source| ConvertError::Resize {
                path: input.to_path_buf(),
                source,
            })?;
        }

        let source_space = request.source_space(&spec);
        let target_space = request.target_space();
        if !same_color_space(&source_space, target_space) {
            reporter.progress(format!(
                "Converting color profile from '{source_space}' to '{target_space}'"
            ));
            if let Err(e) = colorconvert(&mut buffer, &source_space, target_space) {
                reporter.warning_at(
                    "Failed to convert color profile. Continuing...",
                    input,
                    Some(&e.to_string()),
                );
            }
        }

        let source_size = fs::metadata(input).map(|m| m.len()).unwrap_or(0);
        let stamp_time = request.stamp_time.unwrap_or_else(SystemTime::now);
        let params = WriteParams::stamped(input, source_size, stamp_time);
        reporter.progress("Output specs:");
        if reporter.verbose() {
            reporter.progress(output_spec(&buffer, &params).describe());
        }

        let written = self.backend.write(&request.output, &buffer, &params);
        verify_output(&request.output, written.err())?;

        reporter.progress(format!("Finished converting {}", input.display()));
        Ok(ConvertSummary {
            output: request.output.clone(),
            width: buffer.width(),
            height: buffer.height(),
            channels: buffer.nchannels(),
            miplevel,
            subimage,
        })
    }

    /// Walk mip levels of subimage 0 until the file runs out and pick one.
    fn choose_miplevel(
        &self,
        input: &Path,
        target: TargetSize,
        level0: &ImageSpec,
        reporter: &Reporter<'_>,
    ) -> Result<(u32, ImageSpec), ConvertError> {
        let TargetSize::LongEdge(edge) = target else {
            return Ok((0, level0.clone()));
        };

        reporter.progress("Finding best matching mipmap level...");
        let mut levels = vec![level0.clone()];
        loop {
            let next = levels.len() as u32;
            let next_level = self
                .cache
                .spec(self.backend, input, 0, next)
                .map_err(|source| ConvertError::Open {
                    path: input.to_path_buf(),
                    source,
                })?;
            match next_level {
                Some(spec) => levels.push(spec),
                None => break,
            }
        }

        let dims: Vec<(u32, u32)> = levels.iter().map(|s| (s.width, s.height)).collect();
        let chosen = select_miplevel(&dims, edge);
        let spec = levels.swap_remove(chosen);
        if chosen > 0 {
            reporter.progress(format!(
                "Mipmap level {chosen} with size {}x{}",
                spec.width, spec.height
            ));
        }
        Ok((chosen as u32, spec))
    }
}

/// Specification of what is about to be written, for verbose output.
fn output_spec(buffer: &PixelBuffer, params: &WriteParams) -> ImageSpec {
    let names: Vec<&str> = buffer.channel_names().iter().map(String::as_str).collect();
    let mut spec = ImageSpec::new(buffer.width(), buffer.height(), &names);
    spec.format = params.format;
    for (key, value) in &params.attributes {
        spec.set_attribute(key.clone(), AttrValue::Str(value.clone()));
    }
    spec
}

/// A missing or empty output is malformed and is deleted, whatever the
/// encoder said. Otherwise the encoder's own result decides.
fn verify_output(path: &Path, write_error: Option<BackendError>) -> Result<(), ConvertError> {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return match fs::remove_file(path) {
            Ok(()) => Err(ConvertError::MalformedOutput {
                path: path.to_path_buf(),
                cause: write_error,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ConvertError::MalformedOutput {
                path: path.to_path_buf(),
                cause: write_error,
            }),
            Err(source) => Err(ConvertError::MalformedOutputNotRemoved {
                path: path.to_path_buf(),
                source,
            }),
        };
    }
    match write_error {
        Some(source) => Err(ConvertError::Write {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(()),
    }
}
