use pcd_core::pointcloud::{
    block::{PixelRect, PointBlock},
    point::nodata_geodetic,
};

/// Rejects points whose height is further than `threshold` from the median
/// height of the valid points in the surrounding `window` x `window` image
/// neighbourhood. Only meaningful for clouds whose image layout follows the
/// terrain, i.e. clouds read from rasters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MedianFilter {
    pub window: usize,
    pub threshold: f64,
}

impl MedianFilter {
    pub fn new(window: usize, threshold: f64) -> Self {
        Self { window, threshold }
    }

    pub fn half_window(&self) -> usize {
        self.window / 2
    }

    /// The region to read so that every pixel of `rect` sees its whole
    /// window, clipped to an image of `width` x `height`.
    pub fn expand(&self, rect: &PixelRect, width: usize, height: usize) -> PixelRect {
        let half = self.half_window();
        let col = rect.col.saturating_sub(half);
        let row = rect.row.saturating_sub(half);
        let right = (rect.right() + half).min(width).max(rect.right());
        let bottom = (rect.bottom() + half).min(height).max(rect.bottom());
        PixelRect::new(col, row, right - col, bottom - row)
    }

    /// Filters the geodetic or projected points of `rect`, reading
    /// neighbours from `expanded`, which must contain `rect`.
    pub fn apply(&self, expanded: &PointBlock, rect: PixelRect) -> PointBlock {
        let mut out = PointBlock::new(rect, expanded.channels);
        out.copy_from(expanded);

        let half = self.half_window() as isize;
        let mut heights = Vec::with_capacity(self.window * self.window);
        for row in 0..rect.height {
            for col in 0..rect.width {
                let height = out.pixel(col, row)[2];
                if height.is_nan() {
                    continue;
                }

                let center_col = (rect.col + col - expanded.rect.col) as isize;
                let center_row = (rect.row + row - expanded.rect.row) as isize;
                heights.clear();
                for dr in -half..=half {
                    for dc in -half..=half {
                        let (c, r) = (center_col + dc, center_row + dr);
                        if c < 0 || r < 0 || c >= expanded.width() as isize || r >= expanded.height() as isize {
                            continue;
                        }
                        let h = expanded.pixel(c as usize, r as usize)[2];
                        if !h.is_nan() {
                            heights.push(h);
                        }
                    }
                }

                heights.sort_by(f64::total_cmp);
                let median = heights[heights.len() / 2];
                if (height - median).abs() > self.threshold {
                    out.set_point(col, row, &nodata_geodetic());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::point::Point;

    use super::*;

    #[test]
    fn spike_is_removed() {
        let rect = PixelRect::new(0, 0, 5, 5);
        let mut cloud = PointBlock::new(rect, 3);
        for row in 0..5 {
            for col in 0..5 {
                cloud.set_point(col, row, &Point::new(col as f64, row as f64, 10.0 + col as f64 * 0.1));
            }
        }
        cloud.set_point(2, 2, &Point::new(2.0, 2.0, 100.0));

        let filter = MedianFilter::new(3, 5.0);
        let inner = PixelRect::new(1, 1, 3, 3);
        let out = filter.apply(&cloud, inner);
        assert!(out.pixel(1, 1)[2].is_nan());
        assert_eq!(out.pixel(0, 0)[2], 10.1);
        assert_eq!(out.rect, inner);
    }

    #[test]
    fn window_is_clipped_to_the_image() {
        let filter = MedianFilter::new(5, 1.0);
        let expanded = filter.expand(&PixelRect::new(1, 0, 4, 4), 6, 3);
        assert_eq!(expanded, PixelRect::new(0, 0, 6, 4));
    }
}
