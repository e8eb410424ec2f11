//! Pure Rust decode/encode backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Spec read (still images) | `image::ImageReader::into_decoder` (header only) |
//! | Decode (PNG, JPEG, TIFF, WebP, BMP, TGA, EXR, HDR) | `image` crate decoders |
//! | Frames (GIF, APNG) | `image::AnimationDecoder`, one subimage per frame |
//! | Read PNG text chunks | `png::Decoder` (`tEXt`, `zTXt`, `iTXt`) |
//! | Encode PNG with attributes | `png::Encoder` + `iTXt` chunks |
//! | Encode other formats | `image::DynamicImage::save_with_format` (attributes dropped) |
//!
//! The backend never reports mip levels beyond 0 or deep data: none of these
//! formats carry them through the `image` crate.

use super::backend::{AttrValue, BackendError, ImageBackend, ImageSpec, SampleFormat};
use super::buffer::PixelBuffer;
use super::params::{COLOR_SPACE_ATTR, WriteParams};
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::{
    AnimationDecoder, ColorType, DynamicImage, Frame, GrayAlphaImage, GrayImage, ImageDecoder,
    ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::LazyLock;

const INPUT_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("png", ImageFormat::Png),
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
    ("gif", ImageFormat::Gif),
    ("bmp", ImageFormat::Bmp),
    ("tga", ImageFormat::Tga),
    ("exr", ImageFormat::OpenExr),
    ("hdr", ImageFormat::Hdr),
];

const OUTPUT_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("png", ImageFormat::Png),
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
    ("bmp", ImageFormat::Bmp),
    ("tga", ImageFormat::Tga),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    INPUT_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Pure Rust backend using the `image` and `png` crates.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn lookup(table: &[(&str, ImageFormat)], path: &Path) -> Option<ImageFormat> {
    let ext = extension(path);
    table.iter().find(|(e, _)| *e == ext).map(|(_, f)| *f)
}

fn input_format(path: &Path) -> Result<ImageFormat, BackendError> {
    lookup(INPUT_CANDIDATES, path)
        .filter(|f| f.reading_enabled())
        .ok_or_else(|| {
            BackendError::Unsupported(format!("Unsupported file format: {}", path.display()))
        })
}

fn open_reader(path: &Path) -> Result<BufReader<File>, BackendError> {
    Ok(BufReader::new(File::open(path)?))
}

fn decode_err(path: &Path, e: impl std::fmt::Display) -> BackendError {
    BackendError::Decode(format!("{}: {}", path.display(), e))
}

fn encode_err(path: &Path, e: impl std::fmt::Display) -> BackendError {
    BackendError::Encode(format!("{}: {}", path.display(), e))
}

/// All frames of an animated source, or `None` for a still image.
fn animation_frames(path: &Path, format: ImageFormat) -> Result<Option<Vec<Frame>>, BackendError> {
    match format {
        ImageFormat::Gif => {
            let decoder = GifDecoder::new(open_reader(path)?).map_err(|e| decode_err(path, e))?;
            let frames = decoder
                .into_frames()
                .collect_frames()
                .map_err(|e| decode_err(path, e))?;
            Ok(Some(frames))
        }
        ImageFormat::Png => {
            let decoder = PngDecoder::new(open_reader(path)?).map_err(|e| decode_err(path, e))?;
            if !decoder.is_apng().map_err(|e| decode_err(path, e))? {
                return Ok(None);
            }
            let frames = decoder
                .apng()
                .map_err(|e| decode_err(path, e))?
                .into_frames()
                .collect_frames()
                .map_err(|e| decode_err(path, e))?;
            Ok(Some(frames))
        }
        _ => Ok(None),
    }
}

/// Channel names and sample format for a decoder color type.
fn spec_for(width: u32, height: u32, color: ColorType) -> ImageSpec {
    let names: &[&str] = match (color.has_color(), color.has_alpha()) {
        (false, false) => &["Y"],
        (false, true) => &["Y", "A"],
        (true, false) => &["R", "G", "B"],
        (true, true) => &["R", "G", "B", "A"],
    };
    let mut spec = ImageSpec::new(width, height, names);
    spec.format = match color.bytes_per_pixel() / color.channel_count().max(1) {
        1 => SampleFormat::U8,
        2 => SampleFormat::U16,
        _ => SampleFormat::F32,
    };
    spec
}

fn still_spec(path: &Path, format: ImageFormat) -> Result<ImageSpec, BackendError> {
    let decoder = ImageReader::with_format(open_reader(path)?, format)
        .into_decoder()
        .map_err(|e| decode_err(path, e))?;
    let (width, height) = decoder.dimensions();
    Ok(spec_for(width, height, decoder.color_type()))
}

/// Key/value pairs from every PNG text chunk.
fn read_png_text(path: &Path) -> Result<Vec<(String, String)>, BackendError> {
    let reader = png::Decoder::new(open_reader(path)?)
        .read_info()
        .map_err(|e| decode_err(path, e))?;
    let info = reader.info();
    let mut pairs = Vec::new();
    for chunk in &info.uncompressed_latin1_text {
        pairs.push((chunk.keyword.clone(), chunk.text.clone()));
    }
    for chunk in &info.compressed_latin1_text {
        if let Ok(text) = chunk.get_text() {
            pairs.push((chunk.keyword.clone(), text));
        }
    }
    for chunk in &info.utf8_text {
        if let Ok(text) = chunk.get_text() {
            pairs.push((chunk.keyword.clone(), text));
        }
    }
    Ok(pairs)
}

fn to_pixel_buffer(path: &Path, image: &DynamicImage) -> Result<PixelBuffer, BackendError> {
    let (width, height) = (image.width(), image.height());
    let color = image.color();
    let buffer = match (color.has_color(), color.has_alpha()) {
        (false, false) => PixelBuffer::from_flat(width, height, &["Y"], image.to_luma32f().into_raw()),
        (false, true) => PixelBuffer::from_flat(
            width,
            height,
            &["Y", "A"],
            image.to_luma_alpha32f().into_raw(),
        ),
        (true, false) => {
            PixelBuffer::from_flat(width, height, &["R", "G", "B"], image.to_rgb32f().into_raw())
        }
        (true, true) => PixelBuffer::from_flat(
            width,
            height,
            &["R", "G", "B", "A"],
            image.to_rgba32f().into_raw(),
        ),
    };
    buffer.ok_or_else(|| decode_err(path, "decoded sample count does not match dimensions"))
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn write_png(
    path: &Path,
    buffer: &PixelBuffer,
    bytes: &[u8],
    params: &WriteParams,
) -> Result<(), BackendError> {
    let color = match buffer.nchannels() {
        1 => png::ColorType::Grayscale,
        2 => png::ColorType::GrayscaleAlpha,
        3 => png::ColorType::Rgb,
        4 => png::ColorType::Rgba,
        n => {
            return Err(BackendError::Unsupported(format!(
                "cannot encode {n} channels as PNG"
            )));
        }
    };
    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(writer, buffer.width(), buffer.height());
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    for (key, value) in &params.attributes {
        encoder
            .add_itxt_chunk(key.clone(), value.clone())
            .map_err(|e| encode_err(path, e))?;
    }
    let mut writer = encoder.write_header().map_err(|e| encode_err(path, e))?;
    writer
        .write_image_data(bytes)
        .map_err(|e| encode_err(path, e))?;
    writer.finish().map_err(|e| encode_err(path, e))
}

fn to_dynamic(buffer: &PixelBuffer, bytes: Vec<u8>) -> Option<DynamicImage> {
    let (w, h) = buffer.dimensions();
    match buffer.nchannels() {
        1 => GrayImage::from_raw(w, h, bytes).map(DynamicImage::ImageLuma8),
        2 => GrayAlphaImage::from_raw(w, h, bytes).map(DynamicImage::ImageLumaA8),
        3 => RgbImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgba8),
        _ => None,
    }
}

impl ImageBackend for RustBackend {
    fn supports(&self, path: &Path) -> bool {
        input_format(path).is_ok()
    }

    fn spec(
        &self,
        path: &Path,
        subimage: u32,
        miplevel: u32,
    ) -> Result<Option<ImageSpec>, BackendError> {
        let format = input_format(path)?;
        let (mut spec, count) = match animation_frames(path, format)? {
            Some(frames) => {
                let first = frames
                    .first()
                    .ok_or_else(|| decode_err(path, "animation has no frames"))?;
                let (w, h) = first.buffer().dimensions();
                (spec_for(w, h, ColorType::Rgba8), frames.len() as u32)
            }
            None => (still_spec(path, format)?, 1),
        };
        if subimage >= count || miplevel > 0 {
            return Ok(None);
        }

        spec.subimages = count;
        let color_space = match format {
            ImageFormat::OpenExr | ImageFormat::Hdr => "linear",
            _ => "sRGB",
        };
        spec.set_attribute(COLOR_SPACE_ATTR, AttrValue::Str(color_space.to_string()));
        spec.set_attribute("subimages", AttrValue::Int(count as i64));
        if count > 1 {
            spec.set_attribute("Movie", AttrValue::Int(1));
        }
        if format == ImageFormat::Png {
            for (key, value) in read_png_text(path)? {
                spec.set_attribute(key, AttrValue::Str(value));
            }
        }
        Ok(Some(spec))
    }

    fn read(
        &self,
        path: &Path,
        subimage: u32,
        miplevel: u32,
    ) -> Result<PixelBuffer, BackendError> {
        let format = input_format(path)?;
        if miplevel > 0 {
            return Err(decode_err(path, format!("no mip level {miplevel}")));
        }
        let image = match animation_frames(path, format)? {
            Some(frames) => {
                let count = frames.len();
                frames
                    .into_iter()
                    .nth(subimage as usize)
                    .map(|frame| DynamicImage::ImageRgba8(frame.into_buffer()))
                    .ok_or_else(|| {
                        decode_err(path, format!("no subimage {subimage} ({count} frames)"))
                    })?
            }
            None if subimage == 0 => ImageReader::with_format(open_reader(path)?, format)
                .decode()
                .map_err(|e| decode_err(path, e))?,
            None => return Err(decode_err(path, format!("no subimage {subimage}"))),
        };
        to_pixel_buffer(path, &image)
    }

    fn write(
        &self,
        path: &Path,
        buffer: &PixelBuffer,
        params: &WriteParams,
    ) -> Result<(), BackendError> {
        if params.format != SampleFormat::U8 {
            return Err(BackendError::Unsupported(
                "only 8-bit output is supported".to_string(),
            ));
        }
        let data = buffer.flat().ok_or_else(|| {
            BackendError::Unsupported("deep images must be flattened before writing".to_string())
        })?;
        let bytes: Vec<u8> = data.iter().copied().map(quantize).collect();

        let format = lookup(OUTPUT_CANDIDATES, path).ok_or_else(|| {
            BackendError::Unsupported(format!("Unsupported output format: {}", path.display()))
        })?;
        if format == ImageFormat::Png {
            return write_png(path, buffer, &bytes, params);
        }

        let image = to_dynamic(buffer, bytes).ok_or_else(|| {
            BackendError::Unsupported(format!(
                "cannot encode {} channels",
                buffer.nchannels()
            ))
        })?;
        let image = if format == ImageFormat::Jpeg && image.color().has_alpha() {
            DynamicImage::ImageRgb8(image.to_rgb8())
        } else {
            image
        };
        image
            .save_with_format(path, format)
            .map_err(|e| encode_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::SOURCE_SIZE_ATTR;
    use crate::test_helpers::{write_test_gif, write_test_png};
    use std::time::UNIX_EPOCH;

    #[test]
    fn supported_extensions_match_decodable_formats() {
        let exts = supported_input_extensions();
        for expected in &["png", "jpg", "tif", "webp", "gif", "exr", "hdr"] {
            assert!(
                exts.contains(expected),
                "expected {expected} in supported extensions"
            );
        }
    }

    #[test]
    fn supports_by_extension() {
        let backend = RustBackend::new();
        assert!(backend.supports(Path::new("/a/shot.EXR")));
        assert!(!backend.supports(Path::new("/a/clip.mov")));
        assert!(!backend.supports(Path::new("/a/noextension")));
    }

    #[test]
    fn spec_of_rgb_png() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("frame.png");
        write_test_png(&path, 64, 32);

        let spec = RustBackend::new().spec(&path, 0, 0).unwrap().unwrap();
        assert_eq!((spec.width, spec.height), (64, 32));
        assert_eq!(spec.channel_names, vec!["R", "G", "B"]);
        assert_eq!(spec.format, SampleFormat::U8);
        assert_eq!(spec.subimages, 1);
        assert_eq!(spec.string_attribute("ColorSpace").as_deref(), Some("sRGB"));
    }

    #[test]
    fn spec_has_no_mip_levels() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("frame.png");
        write_test_png(&path, 16, 16);

        let backend = RustBackend::new();
        assert!(backend.spec(&path, 0, 1).unwrap().is_none());
        assert!(backend.spec(&path, 1, 0).unwrap().is_none());
        assert!(backend.read(&path, 0, 1).is_err());
    }

    #[test]
    fn grayscale_png_reports_y_channel() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("mask.png");
        GrayImage::from_pixel(8, 8, image::Luma([200])).save(&path).unwrap();

        let backend = RustBackend::new();
        let spec = backend.spec(&path, 0, 0).unwrap().unwrap();
        assert_eq!(spec.channel_names, vec!["Y"]);
        let pixels = backend.read(&path, 0, 0).unwrap();
        assert_eq!(pixels.nchannels(), 1);
        assert!((pixels.pixel(0, 0).unwrap()[0] - 200.0 / 255.0).abs() < 1e-5);
    }

    #[test]
    fn gif_frames_are_subimages() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("loop.gif");
        write_test_gif(&path, 8, 8, &[0, 128, 255]);

        let backend = RustBackend::new();
        let spec = backend.spec(&path, 0, 0).unwrap().unwrap();
        assert_eq!(spec.subimages, 3);
        assert_eq!(spec.int_attribute("Movie"), Some(1));
        assert!(backend.spec(&path, 2, 0).unwrap().is_some());
        assert!(backend.spec(&path, 3, 0).unwrap().is_none());

        let middle = backend.read(&path, 1, 0).unwrap();
        let red = middle.pixel(0, 0).unwrap()[0];
        assert!((red - 128.0 / 255.0).abs() < 0.02);
    }

    #[test]
    fn png_write_roundtrips_attributes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("thumb.png");
        let buffer = PixelBuffer::from_flat(4, 2, &["R", "G", "B", "A"], vec![0.5; 32]).unwrap();
        let params = WriteParams::stamped(Path::new("/src/ünïcode.exr"), 99, UNIX_EPOCH);

        let backend = RustBackend::new();
        backend.write(&path, &buffer, &params).unwrap();

        let spec = backend.spec(&path, 0, 0).unwrap().unwrap();
        assert_eq!((spec.width, spec.height), (4, 2));
        assert_eq!(spec.channel_names, vec!["R", "G", "B", "A"]);
        assert_eq!(spec.string_attribute(SOURCE_SIZE_ATTR).as_deref(), Some("99"));
        assert_eq!(
            spec.string_attribute("bookmarks:SourcePath").as_deref(),
            Some("/src/ünïcode.exr")
        );
        let pixels = backend.read(&path, 0, 0).unwrap();
        assert!((pixels.pixel(3, 1).unwrap()[0] - 128.0 / 255.0).abs() < 1e-5);
    }

    #[test]
    fn jpeg_write_drops_alpha() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("thumb.jpg");
        let buffer = PixelBuffer::from_flat(8, 8, &["R", "G", "B", "A"], vec![0.5; 256]).unwrap();
        let params = WriteParams::stamped(Path::new("/src/a.png"), 1, UNIX_EPOCH);

        let backend = RustBackend::new();
        backend.write(&path, &buffer, &params).unwrap();
        let spec = backend.spec(&path, 0, 0).unwrap().unwrap();
        assert_eq!(spec.channel_names, vec!["R", "G", "B"]);
    }

    #[test]
    fn write_rejects_deep_and_unknown_format() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = RustBackend::new();
        let params = WriteParams::stamped(Path::new("/src/a.png"), 1, UNIX_EPOCH);

        let deep = PixelBuffer::from_deep(1, 1, &["R", "G", "B"], vec![vec![]]).unwrap();
        assert!(
            backend
                .write(&tmp.path().join("a.png"), &deep, &params)
                .is_err()
        );

        let flat = PixelBuffer::from_flat(1, 1, &["R", "G", "B"], vec![0.0; 3]).unwrap();
        let err = backend
            .write(&tmp.path().join("a.xyz"), &flat, &params)
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }

    #[test]
    fn quantize_clamps_and_rounds() {
        assert_eq!(quantize(-0.5), 0);
        assert_eq!(quantize(0.5), 128);
        assert_eq!(quantize(4.0), 255);
    }
}
