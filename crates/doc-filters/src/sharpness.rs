//! Focus measure: variance of the Laplacian.
//!
//! Sharp text has strong second derivatives at stroke edges; blur and low
//! contrast flatten them. The variance of the Laplacian response is a cheap,
//! well-known no-reference sharpness score (higher is sharper).

use image::GrayImage;
use imageproc::filter::laplacian_filter;

/// Variance of the 3×3 Laplacian response. `0.0` for empty images.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let response = laplacian_filter(gray);
    let n = (response.width() * response.height()) as f64;

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for p in response.pixels() {
        let v = p.0[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}
