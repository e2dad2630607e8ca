//! Sauvola adaptive-threshold binarization.
//!
//! For each pixel the threshold is
//!
//! ```text
//! T(x, y) = m(x, y) · (1 + k · (s(x, y) / R − 1))
//! ```
//!
//! where `m` and `s` are the mean and standard deviation of the
//! `window_size × window_size` neighbourhood and `R = 128` is the dynamic
//! range of the standard deviation for 8-bit images. Pixels above the
//! threshold become white (255), the rest black (0).
//!
//! Window sums come from two summed-area tables (values and squared values),
//! so the cost per pixel is constant regardless of the window size.

use crate::FilterError;
use image::{GrayImage, Luma};

/// Dynamic range of the standard deviation for 8-bit images.
const DYNAMIC_RANGE: f64 = 128.0;

/// Parameters of the Sauvola threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SauvolaParams {
    /// Sensitivity to local contrast. Default: 0.24.
    pub k: f64,
    /// Side of the square neighbourhood in pixels. Should be odd; an even
    /// value is widened by one so the window stays centred. Default: 11.
    pub window_size: u32,
}

impl Default for SauvolaParams {
    fn default() -> Self {
        Self {
            k: 0.24,
            window_size: 11,
        }
    }
}

impl SauvolaParams {
    /// Half-width of the effective (always odd) window.
    pub fn radius(&self) -> u32 {
        self.window_size / 2
    }
}

/// Binarize a grayscale image with the Sauvola threshold.
pub fn sauvola(gray: &GrayImage, params: &SauvolaParams) -> Result<GrayImage, FilterError> {
    if params.window_size < 3 {
        return Err(FilterError::InvalidParameter(format!(
            "Sauvola window size must be at least 3, got {}",
            params.window_size
        )));
    }
    if !params.k.is_finite() {
        return Err(FilterError::InvalidParameter(format!(
            "Sauvola k must be finite, got {}",
            params.k
        )));
    }

    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Ok(gray.clone());
    }

    let (sum, sum_sq) = integral_tables(gray);
    let stride = (w + 1) as usize;
    let r = params.radius();

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let y1 = y.saturating_sub(r) as usize;
        let y2 = (y + r + 1).min(h) as usize;
        for x in 0..w {
            let x1 = x.saturating_sub(r) as usize;
            let x2 = (x + r + 1).min(w) as usize;
            let area = ((x2 - x1) * (y2 - y1)) as f64;

            let s = rect_sum(&sum, stride, x1, y1, x2, y2) as f64;
            let sq = rect_sum(&sum_sq, stride, x1, y1, x2, y2) as f64;
            let mean = s / area;
            let variance = (sq / area - mean * mean).max(0.0);
            let threshold = mean * (1.0 + params.k * (variance.sqrt() / DYNAMIC_RANGE - 1.0));

            let v = gray.get_pixel(x, y).0[0] as f64;
            out.put_pixel(x, y, Luma([if v > threshold { 255 } else { 0 }]));
        }
    }
    Ok(out)
}

/// Summed-area tables of pixel values and squared pixel values, each
/// `(w + 1) × (h + 1)` with a zero border.
fn integral_tables(gray: &GrayImage) -> (Vec<u64>, Vec<u64>) {
    let (w, h) = gray.dimensions();
    let stride = (w + 1) as usize;
    let mut sum = vec![0u64; stride * (h + 1) as usize];
    let mut sum_sq = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row = 0u64;
        let mut row_sq = 0u64;
        for x in 0..w {
            let v = gray.get_pixel(x, y).0[0] as u64;
            row += v;
            row_sq += v * v;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            let above = y as usize * stride + (x + 1) as usize;
            sum[idx] = row + sum[above];
            sum_sq[idx] = row_sq + sum_sq[above];
        }
    }
    (sum, sum_sq)
}

fn rect_sum(table: &[u64], stride: usize, x1: usize, y1: usize, x2: usize, y2: usize) -> u64 {
    table[y2 * stride + x2] + table[y1 * stride + x1]
        - table[y1 * stride + x2]
        - table[y2 * stride + x1]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Light page with a dark horizontal stroke through the middle.
    fn page_with_stroke() -> GrayImage {
        GrayImage::from_fn(60, 40, |_, y| {
            if (18..22).contains(&y) {
                Luma([40])
            } else {
                Luma([200])
            }
        })
    }

    #[test]
    fn output_is_strictly_binary() {
        let out = sauvola(&page_with_stroke(), &SauvolaParams::default()).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn stroke_becomes_black_background_white() {
        let out = sauvola(&page_with_stroke(), &SauvolaParams::default()).unwrap();
        assert_eq!(out.get_pixel(30, 20).0[0], 0);
        assert_eq!(out.get_pixel(30, 5).0[0], 255);
    }

    #[test]
    fn even_window_is_accepted() {
        let params = SauvolaParams {
            k: 0.24,
            window_size: 10,
        };
        assert_eq!(params.radius(), 5);
        assert!(sauvola(&page_with_stroke(), &params).is_ok());
    }

    #[test]
    fn tiny_window_is_rejected() {
        let params = SauvolaParams {
            k: 0.24,
            window_size: 1,
        };
        assert!(matches!(
            sauvola(&page_with_stroke(), &params),
            Err(FilterError::InvalidParameter(_))
        ));
    }

    #[test]
    fn rect_sum_matches_naive_sum() {
        let img = GrayImage::from_fn(7, 5, |x, y| Luma([(x * 10 + y) as u8]));
        let (sum, _) = integral_tables(&img);
        let naive: u64 = (1..4)
            .flat_map(|y| (2..6).map(move |x| (x, y)))
            .map(|(x, y)| img.get_pixel(x, y).0[0] as u64)
            .sum();
        assert_eq!(rect_sum(&sum, 8, 2, 1, 6, 4), naive);
    }
}
