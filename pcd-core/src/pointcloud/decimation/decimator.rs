use crate::pointcloud::block::{PixelRect, PointBlock};

pub trait PointCloudDecimator {
    /// Block-local indices of the pixels kept from `block`.
    fn decimate(&self, block: &PointBlock) -> Vec<usize>;
}

/// Keeps the pixels whose image coordinates are both multiples of `stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideDecimator {
    pub stride: usize,
}

impl StrideDecimator {
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    /// Stride for refinement `level` on a `cols` x `rows` image: the image
    /// diagonal divided by 2^level, at least 1.
    pub fn for_level(cols: usize, rows: usize, level: u32) -> Self {
        let diagonal = (cols as f64).hypot(rows as f64);
        Self::new((diagonal / 2f64.powi(level as i32)).floor() as usize)
    }

    /// Image rows that contain sampled pixels.
    pub fn sample_rows(&self, rows: usize) -> impl Iterator<Item = usize> {
        (0..rows).step_by(self.stride)
    }

    pub fn sample_cols(&self, cols: usize) -> impl Iterator<Item = usize> {
        (0..cols).step_by(self.stride)
    }

    /// Whether `rect` contains any sampled pixel, without reading it.
    pub fn samples_in(&self, rect: &PixelRect) -> bool {
        let first = |start: usize| start.div_ceil(self.stride) * self.stride;
        !rect.is_empty() && first(rect.col) < rect.right() && first(rect.row) < rect.bottom()
    }
}

impl PointCloudDecimator for StrideDecimator {
    fn decimate(&self, block: &PointBlock) -> Vec<usize> {
        let rect = block.rect;
        let first = |start: usize| start.div_ceil(self.stride) * self.stride;

        let mut kept = Vec::new();
        let mut row = first(rect.row);
        while row < rect.bottom() {
            let mut col = first(rect.col);
            while col < rect.right() {
                kept.push((row - rect.row) * rect.width + (col - rect.col));
                col += self.stride;
            }
            row += self.stride;
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_shrinks_with_level() {
        assert_eq!(StrideDecimator::for_level(3000, 4000, 7).stride, 39);
        assert_eq!(StrideDecimator::for_level(30, 40, 7).stride, 1);
    }

    #[test]
    fn decimate_uses_image_coordinates() {
        let block = PointBlock::new(PixelRect::new(3, 1, 4, 3), 3);
        let kept = StrideDecimator::new(2).decimate(&block);
        // Image pixels (4,2) and (6,2) only.
        assert_eq!(kept, vec![4 + 1, 4 + 3]);
    }

    #[test]
    fn sampled_rects() {
        let decimator = StrideDecimator::new(10);
        assert!(decimator.samples_in(&PixelRect::new(5, 5, 6, 6)));
        assert!(!decimator.samples_in(&PixelRect::new(1, 0, 9, 20)));
        assert!(!decimator.samples_in(&PixelRect::new(0, 0, 0, 5)));
    }
}
