//! Named color spaces and conversion between them.
//!
//! Only transfer functions are modeled; every supported space shares the
//! Rec.709/sRGB primaries. Names are matched case-insensitively:
//!
//! | Space | Accepted names |
//! |---|---|
//! | sRGB | `sRGB`, `srgb_texture`, and any DPX `GammaCorrectedinf` tag |
//! | Linear | `linear`, `scene_linear`, `lin_srgb`, `lin_rec709` |
//! | Rec.709 | `Rec709`, `rec709_display` |
//! | Gamma 2.2 | `Gamma2.2` |
//! | Gamma 1.8 | `Gamma1.8` |
//!
//! Alpha (`A`) is never touched.

use super::buffer::PixelBuffer;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ColorError {
    #[error("unknown color space '{0}'")]
    UnknownColorSpace(String),
    #[error("cannot color convert deep data")]
    DeepData,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorSpace {
    Srgb,
    Linear,
    Rec709,
    Gamma(f32),
}

impl ColorSpace {
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        // Some DPX writers tag display-referred files as "GammaCorrectedinf".
        if lower.contains("gammacorrectedinf") {
            return Some(ColorSpace::Srgb);
        }
        match lower.as_str() {
            "srgb" | "srgb_texture" => Some(ColorSpace::Srgb),
            "linear" | "scene_linear" | "lin_srgb" | "lin_rec709" => Some(ColorSpace::Linear),
            "rec709" | "rec709_display" => Some(ColorSpace::Rec709),
            "gamma2.2" => Some(ColorSpace::Gamma(2.2)),
            "gamma1.8" => Some(ColorSpace::Gamma(1.8)),
            _ => None,
        }
    }

    fn to_linear(self, v: f32) -> f32 {
        match self {
            ColorSpace::Linear => v,
            ColorSpace::Srgb => {
                if v <= 0.04045 {
                    v / 12.92
                } else {
                    ((v + 0.055) / 1.055).powf(2.4)
                }
            }
            ColorSpace::Rec709 => {
                if v < 0.081 {
                    v / 4.5
                } else {
                    ((v + 0.099) / 1.099).powf(1.0 / 0.45)
                }
            }
            ColorSpace::Gamma(g) => v.max(0.0).powf(g),
        }
    }

    fn from_linear(self, v: f32) -> f32 {
        match self {
            ColorSpace::Linear => v,
            ColorSpace::Srgb => {
                if v <= 0.003_130_8 {
                    v * 12.92
                } else {
                    1.055 * v.powf(1.0 / 2.4) - 0.055
                }
            }
            ColorSpace::Rec709 => {
                if v < 0.018 {
                    v * 4.5
                } else {
                    1.099 * v.powf(0.45) - 0.099
                }
            }
            ColorSpace::Gamma(g) => v.max(0.0).powf(1.0 / g),
        }
    }
}

/// Whether two color-space names describe the same space. Unknown names are
/// only equal to themselves.
pub fn same_color_space(a: &str, b: &str) -> bool {
    match (ColorSpace::parse(a), ColorSpace::parse(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Convert every non-alpha channel of `buffer` in place.
pub fn colorconvert(buffer: &mut PixelBuffer, from: &str, to: &str) -> Result<(), ColorError> {
    let source =
        ColorSpace::parse(from).ok_or_else(|| ColorError::UnknownColorSpace(from.to_string()))?;
    let target =
        ColorSpace::parse(to).ok_or_else(|| ColorError::UnknownColorSpace(to.to_string()))?;
    if source == target {
        return Ok(());
    }
    let n = buffer.nchannels();
    let alpha = buffer.channel_index("A");
    let data = buffer.flat_mut().ok_or(ColorError::DeepData)?;
    data.par_chunks_mut(n).for_each(|pixel| {
        for (c, value) in pixel.iter_mut().enumerate() {
            if Some(c) != alpha {
                *value = target.from_linear(source.to_linear(*value));
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_aliases() {
        assert_eq!(ColorSpace::parse("sRGB"), Some(ColorSpace::Srgb));
        assert_eq!(ColorSpace::parse("Linear"), Some(ColorSpace::Linear));
        assert_eq!(ColorSpace::parse("scene_linear"), Some(ColorSpace::Linear));
        assert_eq!(ColorSpace::parse("REC709"), Some(ColorSpace::Rec709));
        assert_eq!(ColorSpace::parse("Gamma2.2"), Some(ColorSpace::Gamma(2.2)));
        assert_eq!(
            ColorSpace::parse("GammaCorrectedinf"),
            Some(ColorSpace::Srgb)
        );
        assert_eq!(ColorSpace::parse("ACEScg"), None);
    }

    #[test]
    fn same_space_by_alias() {
        assert!(same_color_space("linear", "lin_srgb"));
        assert!(same_color_space("sRGB", "srgb"));
        assert!(!same_color_space("linear", "sRGB"));
        assert!(same_color_space("ACEScg", "ACEScg"));
        assert!(!same_color_space("ACEScg", "sRGB"));
    }

    #[test]
    fn linear_to_srgb_known_values() {
        let mut buf =
            PixelBuffer::from_flat(1, 1, &["R", "G", "B", "A"], vec![0.0, 0.18, 1.0, 0.18])
                .unwrap();
        colorconvert(&mut buf, "linear", "sRGB").unwrap();
        let px = buf.pixel(0, 0).unwrap();
        assert_eq!(px[0], 0.0);
        assert!((px[1] - 0.4613).abs() < 1e-3);
        assert!((px[2] - 1.0).abs() < 1e-5);
        // Alpha untouched.
        assert_eq!(px[3], 0.18);
    }

    #[test]
    fn srgb_roundtrip_is_stable() {
        let values = vec![0.0, 0.02, 0.5, 0.9];
        let mut buf = PixelBuffer::from_flat(4, 1, &["Y"], values.clone()).unwrap();
        colorconvert(&mut buf, "sRGB", "linear").unwrap();
        colorconvert(&mut buf, "linear", "sRGB").unwrap();
        for (a, b) in buf.flat().unwrap().iter().zip(&values) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn unknown_space_is_an_error() {
        let mut buf = PixelBuffer::from_flat(1, 1, &["R"], vec![0.5]).unwrap();
        assert_eq!(
            colorconvert(&mut buf, "ACEScg", "sRGB"),
            Err(ColorError::UnknownColorSpace("ACEScg".to_string()))
        );
        assert_eq!(buf.flat().unwrap(), &[0.5]);
    }
}
