use crate::pointcloud::point::Point;

/// Rectangle of pixels in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    pub fn new(col: usize, row: usize, width: usize, height: usize) -> Self {
        Self {
            col,
            row,
            width,
            height,
        }
    }

    pub fn right(&self) -> usize {
        self.col + self.width
    }

    pub fn bottom(&self) -> usize {
        self.row + self.height
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.col && col < self.right() && row >= self.row && row < self.bottom()
    }

    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let col = self.col.max(other.col);
        let row = self.row.max(other.row);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (col < right && row < bottom).then(|| PixelRect::new(col, row, right - col, bottom - row))
    }

    /// Splits a `width` x `height` image into row-major tiles of at most
    /// `tile_width` x `tile_height`.
    pub fn tiles(width: usize, height: usize, tile_width: usize, tile_height: usize) -> Vec<PixelRect> {
        let mut tiles = Vec::new();
        if tile_width == 0 || tile_height == 0 {
            return tiles;
        }
        for row in (0..height).step_by(tile_height) {
            for col in (0..width).step_by(tile_width) {
                tiles.push(PixelRect::new(
                    col,
                    row,
                    tile_width.min(width - col),
                    tile_height.min(height - row),
                ));
            }
        }
        tiles
    }
}

/// Pixels of a point-cloud image region, `channels` interleaved values each.
/// The first three channels of a point cloud are the point coordinates,
/// followed by optional error channels.
#[derive(Debug, Clone, PartialEq)]
pub struct PointBlock {
    pub rect: PixelRect,
    pub channels: usize,
    pub data: Vec<f64>,
}

impl PointBlock {
    /// A block with every value set to `fill`.
    pub fn filled(rect: PixelRect, channels: usize, fill: f64) -> Self {
        Self {
            rect,
            channels,
            data: vec![fill; rect.area() * channels],
        }
    }

    /// A block of cartesian no-data points.
    pub fn new(rect: PixelRect, channels: usize) -> Self {
        Self::filled(rect, channels, 0.0)
    }

    pub fn width(&self) -> usize {
        self.rect.width
    }

    pub fn height(&self) -> usize {
        self.rect.height
    }

    pub fn len(&self) -> usize {
        self.rect.area()
    }

    pub fn is_empty(&self) -> bool {
        self.rect.is_empty()
    }

    fn offset(&self, col: usize, row: usize) -> usize {
        (row * self.rect.width + col) * self.channels
    }

    /// Pixel at block-local coordinates.
    pub fn pixel(&self, col: usize, row: usize) -> &[f64] {
        let start = self.offset(col, row);
        &self.data[start..start + self.channels]
    }

    pub fn pixel_mut(&mut self, col: usize, row: usize) -> &mut [f64] {
        let start = self.offset(col, row);
        let channels = self.channels;
        &mut self.data[start..start + channels]
    }

    pub fn point(&self, col: usize, row: usize) -> Point {
        let p = self.pixel(col, row);
        Point::new(p[0], p[1], p[2])
    }

    pub fn set_point(&mut self, col: usize, row: usize, point: &Point) {
        let p = self.pixel_mut(col, row);
        p[..3].copy_from_slice(point.as_slice());
    }

    pub fn pixels(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.channels)
    }

    pub fn pixels_mut(&mut self) -> std::slice::ChunksExactMut<'_, f64> {
        self.data.chunks_exact_mut(self.channels)
    }

    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.pixels().map(|p| Point::new(p[0], p[1], p[2]))
    }

    /// Copies the overlapping part of `other`, both placed by their image
    /// rectangles. Channels beyond the smaller count are left untouched.
    pub fn copy_from(&mut self, other: &PointBlock) {
        let Some(overlap) = self.rect.intersection(&other.rect) else {
            return;
        };
        let channels = self.channels.min(other.channels);
        for row in overlap.row..overlap.bottom() {
            for col in overlap.col..overlap.right() {
                let src = other.pixel(col - other.rect.col, row - other.rect.row);
                let dst = self.pixel_mut(col - self.rect.col, row - self.rect.row);
                dst[..channels].copy_from_slice(&src[..channels]);
            }
        }
    }

    /// Keeps only the first `channels` channels.
    pub fn truncate_channels(self, channels: usize) -> Self {
        if channels >= self.channels {
            return self;
        }
        let data = self
            .pixels()
            .flat_map(|p| p[..channels].iter().copied())
            .collect();
        Self {
            rect: self.rect,
            channels,
            data,
        }
    }
}
