use std::collections::VecDeque;

use itertools::iproduct;
use rayon::prelude::*;

use crate::raster::Raster;

/// A connected no-data region small enough to be filled.
struct Hole {
    pixels: Vec<(usize, usize)>,
}

/// 4-connected no-data regions of `raster` whose bounding box fits within
/// `max_len` pixels and that do not touch the raster border.
fn find_holes(raster: &Raster, max_len: usize) -> Vec<Hole> {
    let (width, height) = (raster.width, raster.height);
    let mut seen = vec![false; width * height];
    let mut holes = Vec::new();

    for (row, col) in iproduct!(0..height, 0..width) {
        if seen[row * width + col] || raster.is_valid(col, row) {
            continue;
        }

        let mut pixels = Vec::new();
        let mut queue = VecDeque::from([(col, row)]);
        seen[row * width + col] = true;
        let (mut min_col, mut max_col, mut min_row, mut max_row) = (col, col, row, row);
        while let Some((c, r)) = queue.pop_front() {
            pixels.push((c, r));
            min_col = min_col.min(c);
            max_col = max_col.max(c);
            min_row = min_row.min(r);
            max_row = max_row.max(r);

            let neighbours = [
                (c.wrapping_sub(1), r),
                (c + 1, r),
                (c, r.wrapping_sub(1)),
                (c, r + 1),
            ];
            for (nc, nr) in neighbours {
                if nc >= width || nr >= height {
                    continue;
                }
                let index = nr * width + nc;
                if !seen[index] && !raster.is_valid(nc, nr) {
                    seen[index] = true;
                    queue.push_back((nc, nr));
                }
            }
        }

        let touches_border = min_col == 0 || min_row == 0 || max_col + 1 == width || max_row + 1 == height;
        let fits = max_col - min_col < max_len && max_row - min_row < max_len;
        if fits && !touches_border {
            holes.push(Hole { pixels });
        }
    }
    holes
}

fn window_mean(raster: &Raster, col: usize, row: usize, half: usize) -> Option<f32> {
    let (mut sum, mut count) = (0.0f64, 0usize);
    let rows = row.saturating_sub(half)..(row + half + 1).min(raster.height);
    let cols = col.saturating_sub(half)..(col + half + 1).min(raster.width);
    for (r, c) in iproduct!(rows, cols) {
        if raster.is_valid(c, r) {
            sum += raster.get(c, r, 0) as f64;
            count += 1;
        }
    }
    (count > 0).then(|| (sum / count as f64) as f32)
}

/// Fills small holes of a single channel raster. Each pass replaces the
/// hole pixels that have valid pixels in their `(2k+1) x (2k+1)` window,
/// `k = max(1, hole_fill_len / 2)`, by the mean of those pixels; passes
/// repeat until the holes are filled. Larger no-data regions stay as they
/// are. Returns the number of filled pixels.
pub fn fill_holes(raster: &mut Raster, hole_fill_len: usize) -> usize {
    if hole_fill_len == 0 || raster.channels != 1 {
        return 0;
    }

    let half = (hole_fill_len / 2).max(1);
    let mut pending: Vec<(usize, usize)> = find_holes(raster, hole_fill_len)
        .into_iter()
        .flat_map(|hole| hole.pixels)
        .collect();
    let total = pending.len();

    while !pending.is_empty() {
        let snapshot: &Raster = raster;
        let filled: Vec<((usize, usize), Option<f32>)> = pending
            .par_iter()
            .map(|&(c, r)| ((c, r), window_mean(snapshot, c, r, half)))
            .collect();

        let before = pending.len();
        pending.clear();
        for ((c, r), value) in filled {
            match value {
                Some(v) => raster.set(c, r, 0, v),
                None => pending.push((c, r)),
            }
        }
        if pending.len() == before {
            break;
        }
    }

    let count = total - pending.len();
    log::debug!("filled {} hole pixels", count);
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster_from(width: usize, height: usize, values: &[f32]) -> Raster {
        let mut raster = Raster::new(width, height, 1, -1.0);
        raster.data.copy_from_slice(values);
        raster
    }

    #[test]
    fn isolated_pixel_gets_the_window_mean() {
        #[rustfmt::skip]
        let mut raster = raster_from(3, 3, &[
            1.0, 2.0, 3.0,
            4.0, -1.0, 6.0,
            7.0, 8.0, 9.0,
        ]);
        assert_eq!(fill_holes(&mut raster, 2), 1);
        assert_eq!(raster.get(1, 1, 0), 5.0);
    }

    #[test]
    fn large_and_border_holes_stay() {
        let mut raster = Raster::new(8, 8, 1, -1.0);
        raster.data.iter_mut().for_each(|v| *v = 1.0);
        // A 4x4 hole in the middle and a hole on the border.
        for (r, c) in iproduct!(2..6, 2..6) {
            raster.set(c, r, 0, -1.0);
        }
        raster.set(0, 7, 0, -1.0);

        assert_eq!(fill_holes(&mut raster, 3), 0);
        assert!(!raster.is_valid(3, 3));
        assert!(!raster.is_valid(0, 7));

        assert_eq!(fill_holes(&mut raster, 4), 16);
        assert!(iproduct!(2..6, 2..6).all(|(r, c)| raster.get(c, r, 0) == 1.0));
        assert!(!raster.is_valid(0, 7));
    }

    #[test]
    fn holes_fill_from_the_outside_in() {
        let mut raster = Raster::new(7, 7, 1, -1.0);
        for (r, c) in iproduct!(0..7, 0..7) {
            let inside = (2..5).contains(&r) && (2..5).contains(&c);
            raster.set(c, r, 0, if inside { -1.0 } else { 2.0 });
        }
        // k = 1: the center only sees valid pixels on the second pass.
        assert_eq!(fill_holes(&mut raster, 3), 9);
        assert_eq!(raster.valid_count(), 49);
        assert_eq!(raster.get(3, 3, 0), 2.0);
    }
}
