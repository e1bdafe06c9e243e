use std::cmp::Ordering;

use pcd_core::pointcloud::{
    block::{PixelRect, PointBlock},
    point::{nodata_cartesian, Point},
};

use crate::error::ChipperError;

fn larger_axis(points: &[Point]) -> usize {
    let mut min = [f64::MAX; 2];
    let mut max = [f64::MIN; 2];
    for p in points {
        for axis in 0..2 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    if max[1] - min[1] > max[0] - min[0] {
        1
    } else {
        0
    }
}

/// Splits `points` in place into runs of `capacity` points (the last one
/// possibly shorter), each run a spatially compact group.
fn partition<'a>(points: &'a mut [Point], capacity: usize, leaves: &mut Vec<&'a mut [Point]>) {
    let num_leaves = points.len().div_ceil(capacity);
    if num_leaves <= 1 {
        if !points.is_empty() {
            leaves.push(points);
        }
        return;
    }

    let split = (num_leaves / 2) * capacity;
    let axis = larger_axis(points);
    points.select_nth_unstable_by(split, |a, b| {
        a[axis].partial_cmp(&b[axis]).unwrap_or(Ordering::Equal)
    });
    let (left, right) = points.split_at_mut(split);
    partition(left, capacity, leaves);
    partition(right, capacity, leaves);
}

/// Rearranges `points` into the image region `rect` so that spatially close
/// points land in the same `block_size` x `block_size` block. Leaves fill
/// the blocks in row-major block order, row-major inside each block; unused
/// cells are cartesian no-data.
pub fn chip(points: Vec<Point>, rect: PixelRect, block_size: usize) -> Result<PointBlock, ChipperError> {
    chip_with_nodata(points, rect, block_size, &nodata_cartesian())
}

/// Like `chip`, with unused cells set to `nodata`.
pub fn chip_with_nodata(
    mut points: Vec<Point>,
    rect: PixelRect,
    block_size: usize,
    nodata: &Point,
) -> Result<PointBlock, ChipperError> {
    if block_size == 0 || rect.width % block_size != 0 || rect.height % block_size != 0 {
        return Err(ChipperError::InvalidLayout(format!(
            "region {}x{} is not a multiple of block size {}",
            rect.width, rect.height, block_size
        )));
    }
    if points.len() > rect.area() {
        return Err(ChipperError::SizeMismatch {
            expected: rect.area(),
            actual: points.len(),
        });
    }

    let capacity = block_size * block_size;
    let mut leaves = Vec::with_capacity(points.len().div_ceil(capacity));
    partition(&mut points, capacity, &mut leaves);

    let blocks_across = rect.width / block_size;
    let mut block = PointBlock::new(rect, 3);
    if *nodata != nodata_cartesian() {
        for pixel in block.pixels_mut() {
            pixel.copy_from_slice(nodata.as_slice());
        }
    }
    for (leaf_index, leaf) in leaves.iter().enumerate() {
        let block_col = (leaf_index % blocks_across) * block_size;
        let block_row = (leaf_index / blocks_across) * block_size;
        for (i, point) in leaf.iter().enumerate() {
            block.set_point(block_col + i % block_size, block_row + i / block_size, point);
        }
    }
    Ok(block)
}
