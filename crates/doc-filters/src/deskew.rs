//! Deskew by projection profiling.
//!
//! Text lines on a straight page produce a row-projection profile (count of
//! ink pixels per row) with sharp peaks and valleys. Rotating a skewed page
//! by the correcting angle maximises that sharpness, measured as the sum of
//! squared differences between adjacent rows.
//!
//! The search runs on a downscaled copy, trying every candidate angle in
//! `[-MAX_ANGLE, MAX_ANGLE]` at `STEP` degrees, then rotates the
//! full-resolution image once by the winner.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

/// Largest skew (degrees) searched in either direction.
pub const MAX_ANGLE: f32 = 5.0;

/// Search resolution in degrees.
pub const STEP: f32 = 0.5;

/// Longest edge of the copy used for the angle search.
const SEARCH_EDGE: u32 = 800;

/// Pixels darker than this count as ink.
const INK_THRESHOLD: u8 = 128;

/// Estimate the rotation (degrees) that straightens the page. Returns `0.0`
/// for blank or tiny images.
pub fn estimate_skew(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w < 16 || h < 16 {
        return 0.0;
    }

    let longest = w.max(h);
    let sample = if longest > SEARCH_EDGE {
        let scale = SEARCH_EDGE as f32 / longest as f32;
        let sw = ((w as f32 * scale).round() as u32).max(1);
        let sh = ((h as f32 * scale).round() as u32).max(1);
        imageops::resize(gray, sw, sh, FilterType::Triangle)
    } else {
        gray.clone()
    };

    if !sample.pixels().any(|p| p.0[0] < INK_THRESHOLD) {
        return 0.0;
    }

    let steps = (MAX_ANGLE / STEP).round() as i32;
    let mut best_angle = 0.0f32;
    let mut best_score = profile_sharpness(&sample);
    for i in -steps..=steps {
        if i == 0 {
            continue;
        }
        let angle = i as f32 * STEP;
        let score = profile_sharpness(&rotate(&sample, angle));
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }
    best_angle
}

/// Rotate about the centre by `degrees`, filling uncovered corners white.
pub fn rotate(gray: &GrayImage, degrees: f32) -> GrayImage {
    rotate_about_center(
        gray,
        degrees.to_radians(),
        Interpolation::Bilinear,
        Luma([255]),
    )
}

/// Straighten a page. Returns the corrected image and the applied angle.
pub fn deskew(gray: &GrayImage) -> (GrayImage, f32) {
    let angle = estimate_skew(gray);
    if angle == 0.0 {
        return (gray.clone(), 0.0);
    }
    (rotate(gray, angle), angle)
}

fn profile_sharpness(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    let mut rows = Vec::with_capacity(h as usize);
    for y in 0..h {
        let ink = (0..w)
            .filter(|&x| gray.get_pixel(x, y).0[0] < INK_THRESHOLD)
            .count();
        rows.push(ink as f64);
    }
    rows.windows(2).map(|pair| (pair[1] - pair[0]).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// White page with evenly spaced black text-like bars.
    fn lined_page() -> GrayImage {
        GrayImage::from_fn(240, 240, |x, y| {
            if (30..210).contains(&x) && y % 20 < 4 && (20..220).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn straight_page_needs_no_rotation() {
        assert_eq!(estimate_skew(&lined_page()), 0.0);
    }

    #[test]
    fn recovers_known_skew() {
        let skewed = rotate(&lined_page(), 3.0);
        let angle = estimate_skew(&skewed);
        assert!((angle + 3.0).abs() <= 1.0, "estimated {angle}");
    }

    #[test]
    fn blank_page_is_left_alone() {
        let blank = GrayImage::from_pixel(100, 100, Luma([255]));
        let (out, angle) = deskew(&blank);
        assert_eq!(angle, 0.0);
        assert_eq!(out, blank);
    }
}
