use itertools::iproduct;

use crate::raster::Raster;

/// Bodies with a radius at or below this, in meters, keep full precision.
pub const MIN_RADIUS_FOR_ROUNDING: f64 = 1e5;

/// Default rounding step of output heights and errors, about a millimeter.
pub const APPROX_ONE_MM: f64 = 1.0 / 1024.0;

/// Rounds valid values to multiples of `step`. A non-positive step
/// disables rounding.
pub fn round_valid(raster: &mut Raster, step: f64) {
    if step <= 0.0 {
        return;
    }
    raster.map_valid(|v| ((v as f64 / step).round() * step) as f32);
}

/// Rounding step to use on a body with the given semi-axes.
pub fn rounding_step(step: f64, semi_major_axis: f64, semi_minor_axis: f64) -> f64 {
    if semi_major_axis <= MIN_RADIUS_FOR_ROUNDING || semi_minor_axis <= MIN_RADIUS_FOR_ROUNDING {
        0.0
    } else {
        step
    }
}

/// Invalidates every valid pixel within `erode_len` pixels (in both
/// directions) of a no-data pixel.
pub fn erode(raster: &mut Raster, erode_len: usize) {
    if erode_len == 0 {
        return;
    }
    let original = raster.clone();
    let (width, height) = (raster.width, raster.height);
    for (row, col) in iproduct!(0..height, 0..width) {
        if !original.is_valid(col, row) {
            continue;
        }
        let rows = row.saturating_sub(erode_len)..(row + erode_len + 1).min(height);
        let cols = col.saturating_sub(erode_len)..(col + erode_len + 1).min(width);
        if iproduct!(rows, cols).any(|(r, c)| !original.is_valid(c, r)) {
            for channel in 0..raster.channels {
                raster.set(col, row, channel, raster.nodata);
            }
        }
    }
}

/// Maps heights in `[min, max]` to 1..=255 bytes; no-data becomes 0.
pub fn normalize(raster: &Raster, min: f64, max: f64) -> Vec<u8> {
    let range = max - min;
    (0..raster.num_pixels())
        .map(|pixel| {
            let value = raster.data[pixel * raster.channels];
            if !raster.is_valid_value(value) {
                return 0;
            }
            let scaled = if range > 0.0 {
                (value as f64 - min) / range * 254.0 + 1.0
            } else {
                1.0
            };
            scaled.round().clamp(1.0, 255.0) as u8
        })
        .collect()
}

/// Kernel width covering three standard deviations on each side.
fn kernel_size(sigma: f64) -> usize {
    2 * (3.0 * sigma).ceil() as usize + 1
}

/// No-data pixels become the mean of the valid pixels in a `size` x `size`
/// window, when there are any.
fn fill_with_window_average(raster: &Raster, size: usize) -> Raster {
    let half = size / 2;
    let mut out = raster.clone();
    for (row, col) in iproduct!(0..raster.height, 0..raster.width) {
        if raster.is_valid(col, row) {
            continue;
        }
        let rows = row.saturating_sub(half)..(row + half + 1).min(raster.height);
        let cols = col.saturating_sub(half)..(col + half + 1).min(raster.width);
        let (mut sum, mut count) = (0.0f64, 0usize);
        for (r, c) in iproduct!(rows, cols) {
            if raster.is_valid(c, r) {
                sum += raster.get(c, r, 0) as f64;
                count += 1;
            }
        }
        if count > 0 {
            out.set(col, row, 0, (sum / count as f64) as f32);
        }
    }
    out
}

/// Separable Gaussian blur normalized over valid pixels; no-data stays.
fn gaussian_blur(raster: &Raster, sigma: f64) -> Raster {
    let half = kernel_size(sigma) as isize / 2;
    let weights: Vec<f64> = (-half..=half)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();

    let pass = |src: &Raster, horizontal: bool| {
        let mut dst = src.clone();
        for (row, col) in iproduct!(0..src.height, 0..src.width) {
            if !src.is_valid(col, row) {
                continue;
            }
            let (mut sum, mut norm) = (0.0, 0.0);
            for (k, w) in (-half..=half).zip(&weights) {
                let (c, r) = if horizontal {
                    (col as isize + k, row as isize)
                } else {
                    (col as isize, row as isize + k)
                };
                if c < 0 || r < 0 || c >= src.width as isize || r >= src.height as isize {
                    continue;
                }
                if src.is_valid(c as usize, r as usize) {
                    sum += w * src.get(c as usize, r as usize, 0) as f64;
                    norm += w;
                }
            }
            dst.set(col, row, 0, (sum / norm) as f32);
        }
        dst
    };
    pass(&pass(raster, true), false)
}

/// Resamples a raster gridded at `fsaa` times the output resolution back
/// to `width` x `height`, after filling small gaps and blurring with a
/// Gaussian of sigma `fsaa / 2`. Output pixel (c, r) is sampled at fine
/// pixel `(c * fsaa + (fsaa - 1) / 2, r * fsaa + (fsaa - 1) / 2)`.
pub fn antialias(fine: &Raster, fsaa: usize, width: usize, height: usize) -> Raster {
    let mut out = Raster::new(width, height, 1, fine.nodata);
    if fsaa <= 1 || fine.channels != 1 {
        return out;
    }

    let sigma = fsaa as f64 / 2.0;
    let blurred = gaussian_blur(&fill_with_window_average(fine, kernel_size(sigma)), sigma);
    let offset = (fsaa as f64 - 1.0) / 2.0;

    for (row, col) in iproduct!(0..height, 0..width) {
        let x = col as f64 * fsaa as f64 + offset;
        let y = row as f64 * fsaa as f64 + offset;
        let (x0, y0) = (x.floor() as usize, y.floor() as usize);
        let (fx, fy) = (x - x0 as f64, y - y0 as f64);

        let (mut sum, mut norm) = (0.0, 0.0);
        for (dy, dx) in iproduct!(0..2, 0..2) {
            let (c, r) = (x0 + dx, y0 + dy);
            if c >= blurred.width || r >= blurred.height || !blurred.is_valid(c, r) {
                continue;
            }
            let w = if dx == 0 { 1.0 - fx } else { fx } * if dy == 0 { 1.0 - fy } else { fy };
            if w > 0.0 {
                sum += w * blurred.get(c, r, 0) as f64;
                norm += w;
            }
        }
        if norm > 0.0 {
            out.set(col, row, 0, (sum / norm) as f32);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_skips_nodata_and_small_bodies() {
        let mut raster = Raster::new(3, 1, 1, -100.0);
        raster.data = vec![1.3, -100.0, 2.26];
        round_valid(&mut raster, 0.5);
        assert_eq!(raster.data, vec![1.5, -100.0, 2.5]);

        assert_eq!(rounding_step(APPROX_ONE_MM, 6378137.0, 6356752.3), APPROX_ONE_MM);
        assert_eq!(rounding_step(APPROX_ONE_MM, 6378137.0, 1e5), 0.0);
    }

    #[test]
    fn erosion_shrinks_valid_area() {
        let mut raster = Raster::new(5, 1, 1, -1.0);
        raster.data = vec![-1.0, 1.0, 1.0, 1.0, 1.0];
        erode(&mut raster, 2);
        assert_eq!(raster.data, vec![-1.0, -1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn normalized_range() {
        let mut raster = Raster::new(3, 1, 1, -1.0);
        raster.data = vec![10.0, -1.0, 20.0];
        assert_eq!(normalize(&raster, 10.0, 20.0), vec![1, 0, 255]);
    }

    #[test]
    fn antialias_keeps_constant_surfaces() {
        let mut fine = Raster::new(9, 9, 1, -1.0);
        fine.data.iter_mut().for_each(|v| *v = 7.0);
        fine.set(4, 4, 0, -1.0);
        let out = antialias(&fine, 3, 3, 3);
        assert_eq!(out.valid_count(), 9);
        assert!(out.data.iter().all(|v| (v - 7.0).abs() < 1e-5));
    }
}
