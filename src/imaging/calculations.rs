//! Pure calculation functions for conversion geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::TargetSize;

/// Round up to the nearest even number (4:2:0 consumers need even edges).
pub fn round_up_even(n: u32) -> u32 {
    if n % 2 == 0 { n } else { n.saturating_add(1) }
}

/// Pick the mip level to decode for a target edge.
///
/// `levels` holds the `(width, height)` of each available level, level 0
/// first. Among levels where both edges are at least `target`, the tightest
/// one wins: a level replaces the current pick only when it is smaller in
/// both dimensions. With no qualifying level the answer is level 0.
pub fn select_miplevel(levels: &[(u32, u32)], target: u32) -> usize {
    let mut best: Option<(usize, (u32, u32))> = None;
    for (level, &(w, h)) in levels.iter().enumerate() {
        if w < target || h < target {
            continue;
        }
        match best {
            None => best = Some((level, (w, h))),
            Some((_, (bw, bh))) if w < bw && h < bh => best = Some((level, (w, h))),
            Some(_) => {}
        }
    }
    best.map(|(level, _)| level).unwrap_or(0)
}

/// The subimage used as the representative frame of a multi-frame source.
pub fn representative_subimage(subimages: u32) -> u32 {
    if subimages > 1 { subimages / 2 } else { 0 }
}

/// Calculate output dimensions for the current buffer.
///
/// - [`TargetSize::Preserve`] keeps `current`.
/// - [`TargetSize::LongEdge`] scales the longer edge to the target and
///   derives the shorter edge from the long/short aspect ratio, truncating.
///
/// A derived edge that truncates to zero becomes one pixel. Both edges are
/// then rounded up to even.
///
/// ```text
/// LongEdge(400), 1920x1080 → 400x226   (225 → 226)
/// LongEdge(400), 1080x1920 → 226x400
/// LongEdge(2),   4096x17   → 2x2       (0 → 1 → 2)
/// Preserve,      1001x500  → 1002x500
/// ```
pub fn output_dimensions(target: TargetSize, current: (u32, u32)) -> (u32, u32) {
    let (width, height) = current;
    let (w, h) = match target.resolve(width, height) {
        TargetSize::LongEdge(size) => {
            // size / (long / short), in integers so 16:9 lands exactly.
            let long = width.max(height).max(1) as u64;
            let short = width.min(height).max(1) as u64;
            let derived = ((size as u64 * short / long) as u32).max(1);
            if width > height {
                (size, derived)
            } else {
                (derived, size)
            }
        }
        TargetSize::Preserve | TargetSize::Native => (width, height),
    };
    (round_up_even(w), round_up_even(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_rounding() {
        assert_eq!(round_up_even(0), 0);
        assert_eq!(round_up_even(7), 8);
        assert_eq!(round_up_even(8), 8);
    }

    #[test]
    fn miplevel_tightest_fit() {
        let levels = [(2048, 1024), (1024, 512), (512, 256), (256, 128)];
        assert_eq!(select_miplevel(&levels, 500), 1);
        assert_eq!(select_miplevel(&levels, 256), 2);
        assert_eq!(select_miplevel(&levels, 128), 3);
    }

    #[test]
    fn miplevel_falls_back_to_zero() {
        let levels = [(512, 256), (256, 128)];
        assert_eq!(select_miplevel(&levels, 1024), 0);
        assert_eq!(select_miplevel(&[], 10), 0);
    }

    #[test]
    fn miplevel_requires_both_edges_smaller_to_replace() {
        // Level 1 only shrinks width, so level 0 stays the pick.
        let levels = [(1024, 600), (600, 600)];
        assert_eq!(select_miplevel(&levels, 500), 0);
    }

    #[test]
    fn middle_frame() {
        assert_eq!(representative_subimage(0), 0);
        assert_eq!(representative_subimage(1), 0);
        assert_eq!(representative_subimage(2), 1);
        assert_eq!(representative_subimage(9), 4);
    }

    #[test]
    fn landscape_long_edge() {
        assert_eq!(
            output_dimensions(TargetSize::LongEdge(400), (1920, 1080)),
            (400, 226)
        );
    }

    #[test]
    fn portrait_long_edge() {
        assert_eq!(
            output_dimensions(TargetSize::LongEdge(400), (1080, 1920)),
            (226, 400)
        );
    }

    #[test]
    fn square_long_edge() {
        assert_eq!(
            output_dimensions(TargetSize::LongEdge(128), (300, 300)),
            (128, 128)
        );
    }

    #[test]
    fn extreme_aspect_keeps_a_visible_short_edge() {
        assert_eq!(
            output_dimensions(TargetSize::LongEdge(2), (4096, 17)),
            (2, 2)
        );
        assert_eq!(
            output_dimensions(TargetSize::LongEdge(64), (1, 4000)),
            (2, 64)
        );
    }

    #[test]
    fn odd_target_rounds_up() {
        assert_eq!(
            output_dimensions(TargetSize::LongEdge(101), (200, 100)),
            (102, 50)
        );
    }

    #[test]
    fn preserve_keeps_dimensions_rounded_even() {
        assert_eq!(
            output_dimensions(TargetSize::Preserve, (640, 480)),
            (640, 480)
        );
        assert_eq!(
            output_dimensions(TargetSize::Preserve, (1001, 499)),
            (1002, 500)
        );
    }

    #[test]
    fn aspect_preserved_within_rounding() {
        for &(w, h) in &[(1920u32, 1080u32), (333, 1000), (4096, 17), (50, 49)] {
            let (ow, oh) = output_dimensions(TargetSize::LongEdge(256), (w, h));
            assert_eq!(ow.max(oh), 256);
            let expected_short = 256.0 * w.min(h) as f32 / w.max(h) as f32;
            assert!((ow.min(oh) as f32 - expected_short).abs() <= 2.0);
        }
    }
}
