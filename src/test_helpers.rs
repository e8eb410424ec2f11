//! Shared test utilities.
//!
//! Provides a diagnostic sink that records everything it is given, plus
//! writers for small synthetic source images.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let sink = RecordingDiagnostics::default();
//! write_test_png(&tmp.path().join("frame.png"), 64, 32);
//! // ... run a conversion with `&sink` ...
//! assert!(sink.with_severity(Severity::Error).is_empty());
//! ```

use crate::diagnostics::{Diagnostics, Severity};
use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, Rgb, RgbImage, Rgba, RgbaImage};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

// =========================================================================
// Diagnostics
// =========================================================================

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<(Severity, String)>>,
}

impl Diagnostics for RecordingDiagnostics {
    fn emit(&self, severity: Severity, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
    }
}

impl RecordingDiagnostics {
    pub fn events(&self) -> Vec<(Severity, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, m)| m).collect()
    }

    pub fn with_severity(&self, severity: Severity) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m)
            .collect()
    }
}

// =========================================================================
// Synthetic images
// =========================================================================

/// Write an RGB gradient PNG.
pub fn write_test_png(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    img.save(path).unwrap();
}

/// Write an animated GIF with one solid frame per entry of `reds`; each
/// frame's red channel is the given value.
pub fn write_test_gif(path: &Path, width: u32, height: u32, reds: &[u8]) {
    let frames = reds.iter().map(|&red| {
        let img = RgbaImage::from_pixel(width, height, Rgba([red, 0, 0, 255]));
        Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1))
    });
    let mut encoder = GifEncoder::new(File::create(path).unwrap());
    encoder.encode_frames(frames).unwrap();
}
