//! Tone filters: grayscale conversion, contrast stretching and CLAHE.
//!
//! Contrast enhancement for faded or dark scans is a two-step process:
//! a global min-max stretch to use the full 0–255 range, followed by
//! contrast-limited adaptive histogram equalization (CLAHE) so that locally
//! dark regions (microfiche edges, shadowed gutters) gain contrast without
//! blowing out the rest of the page.

use image::{DynamicImage, GrayImage, Luma};

/// Default CLAHE clip limit (relative to a uniform histogram).
pub const DEFAULT_CLIP_LIMIT: f32 = 2.0;

/// Default CLAHE tile grid (tiles per axis).
pub const DEFAULT_TILE_GRID: u32 = 8;

/// Convert any image to 8-bit grayscale.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Linearly stretch intensities so the darkest pixel maps to 0 and the
/// brightest to 255. A flat image is returned unchanged.
pub fn normalize_min_max(gray: &GrayImage) -> GrayImage {
    let (mut lo, mut hi) = (u8::MAX, u8::MIN);
    for p in gray.pixels() {
        lo = lo.min(p.0[0]);
        hi = hi.max(p.0[0]);
    }
    if hi <= lo {
        return gray.clone();
    }

    let range = (hi - lo) as f32;
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        let v = (p.0[0] - lo) as f32 * 255.0 / range;
        p.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a `tile_grid × tile_grid` grid (fewer tiles for
/// images smaller than the grid). Each tile gets its own equalization
/// lookup table built from a histogram clipped at
/// `clip_limit × (tile_area / 256)`, with the clipped excess spread evenly
/// over all bins. Output pixels are bilinearly interpolated between the four
/// nearest tile tables, which avoids visible tile seams.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tile_grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }

    let grid = tile_grid.max(1);
    let tile_w = w.div_ceil(grid.min(w));
    let tile_h = h.div_ceil(grid.min(h));
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y).0[0] as usize] += 1;
                }
            }

            let area = (x1 - x0) * (y1 - y0);
            let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            let mut residual = excess % 256;
            for bin in hist.iter_mut() {
                *bin += bonus;
                if residual > 0 {
                    *bin += 1;
                    residual -= 1;
                }
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (i, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[i] = (cdf as f32 * 255.0 / area as f32).round().min(255.0) as u8;
            }
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let (ty0, ty1, wy) = neighbours(y, tile_h, tiles_y);
        for x in 0..w {
            let (tx0, tx1, wx) = neighbours(x, tile_w, tiles_x);
            let v = gray.get_pixel(x, y).0[0] as usize;

            let top_left = luts[(ty0 * tiles_x + tx0) as usize][v] as f32;
            let top_right = luts[(ty0 * tiles_x + tx1) as usize][v] as f32;
            let bottom_left = luts[(ty1 * tiles_x + tx0) as usize][v] as f32;
            let bottom_right = luts[(ty1 * tiles_x + tx1) as usize][v] as f32;

            let top = top_left * (1.0 - wx) + top_right * wx;
            let bottom = bottom_left * (1.0 - wx) + bottom_right * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Tile indices on either side of `pos` and the interpolation weight of the
/// second one, measured between tile centres.
fn neighbours(pos: u32, tile: u32, tiles: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
    let first = f.floor().clamp(0.0, (tiles - 1) as f32);
    let second = (first as u32 + 1).min(tiles - 1);
    let weight = (f - first).clamp(0.0, 1.0);
    (first as u32, second, weight)
}

/// Min-max stretch followed by CLAHE with the default clip limit and grid.
pub fn enhance_contrast(gray: &GrayImage) -> GrayImage {
    clahe(&normalize_min_max(gray), DEFAULT_CLIP_LIMIT, DEFAULT_TILE_GRID)
}
