//! Non-local means denoising for grayscale scans.
//!
//! Each pixel becomes a weighted average of the pixels in its search window,
//! weighted by how similar their surrounding patches are:
//!
//! ```text
//! w(p, q) = exp(-(SSD(patch(p), patch(q)) / patch_area) / h²)
//! ```
//!
//! Patch distances are computed one search offset at a time from an integral
//! image of squared differences, so the cost is `O(pixels × search_area)`
//! independent of the patch size. Pixels outside the image are clamped to
//! the nearest edge.

use image::{GrayImage, Luma};

/// Filter strength. Larger values smooth more.
pub const STRENGTH: f32 = 10.0;

/// Patch radius (radius 3 → 7×7 template).
pub const PATCH_RADIUS: u32 = 3;

/// Search radius (radius 10 → 21×21 window).
pub const SEARCH_RADIUS: u32 = 10;

/// Denoise with the fixed strength used before model binarization.
pub fn denoise(gray: &GrayImage) -> GrayImage {
    nl_means(gray, STRENGTH, PATCH_RADIUS, SEARCH_RADIUS)
}

/// Non-local means with explicit parameters.
pub fn nl_means(gray: &GrayImage, strength: f32, patch_radius: u32, search_radius: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }
    let (w, h) = (width as usize, height as usize);
    let src = gray.as_raw();
    let at = |x: isize, y: isize| -> f32 {
        let x = x.clamp(0, w as isize - 1) as usize;
        let y = y.clamp(0, h as isize - 1) as usize;
        src[y * w + x] as f32
    };

    let pr = patch_radius as isize;
    let sr = search_radius as isize;
    let area = ((2 * pr + 1) * (2 * pr + 1)) as f32;
    let inv_h2 = 1.0 / (strength * strength).max(f32::EPSILON);

    // Integral table over the image padded by `pr` on every side.
    let pw = w + 2 * pr as usize;
    let ph = h + 2 * pr as usize;
    let stride = pw + 1;
    let mut integral = vec![0f64; stride * (ph + 1)];

    let mut weight_sum = vec![0f32; w * h];
    let mut value_sum = vec![0f32; w * h];

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            for py in 0..ph {
                let y = py as isize - pr;
                let mut row = 0f64;
                for px in 0..pw {
                    let x = px as isize - pr;
                    let d = at(x, y) - at(x + dx, y + dy);
                    row += (d * d) as f64;
                    integral[(py + 1) * stride + px + 1] = integral[py * stride + px + 1] + row;
                }
            }

            let span = 2 * pr as usize + 1;
            for y in 0..h {
                for x in 0..w {
                    let (x1, y1) = (x + span, y + span);
                    let ssd = integral[y1 * stride + x1] - integral[y * stride + x1]
                        - integral[y1 * stride + x]
                        + integral[y * stride + x];
                    let weight = (-(ssd as f32 / area) * inv_h2).exp();
                    let i = y * w + x;
                    weight_sum[i] += weight;
                    value_sum[i] += weight * at(x as isize + dx, y as isize + dy);
                }
            }
        }
    }

    // The zero offset always contributes weight 1, so no sum is zero.
    GrayImage::from_fn(width, height, |x, y| {
        let i = y as usize * w + x as usize;
        Luma([(value_sum[i] / weight_sum[i]).round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variance(img: &GrayImage) -> f64 {
        let n = img.pixels().count() as f64;
        let mean = img.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
        img.pixels()
            .map(|p| (p.0[0] as f64 - mean).powi(2))
            .sum::<f64>()
            / n
    }

    #[test]
    fn flattens_grain_on_a_uniform_background() {
        let mut state = 0x9e37_79b9_7f4a_7c15u64;
        let img = GrayImage::from_fn(32, 32, |_, _| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            Luma([108 + (state % 41) as u8])
        });
        let out = denoise(&img);
        assert!(variance(&out) * 2.0 < variance(&img));
    }

    #[test]
    fn keeps_stroke_edges() {
        let img = GrayImage::from_fn(16, 9, |x, _| if x < 8 { Luma([0]) } else { Luma([255]) });
        let out = denoise(&img);
        assert_eq!(out.get_pixel(1, 4).0[0], 0);
        assert_eq!(out.get_pixel(14, 4).0[0], 255);
    }

    #[test]
    fn uniform_image_is_unchanged() {
        let img = GrayImage::from_pixel(5, 4, Luma([77]));
        assert_eq!(denoise(&img), img);
    }

    #[test]
    fn empty_image_passes_through() {
        assert_eq!(denoise(&GrayImage::new(0, 0)).dimensions(), (0, 0));
    }
}
