use std::convert::Infallible;

use crate::pointcloud::block::{PixelRect, PointBlock};

/// A point cloud laid out as an image, read one rectangle at a time.
/// Implementations are shared read-only between worker threads.
pub trait PointImage: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn num_channels(&self) -> usize;

    /// Reads `rect`; pixels outside the image are no-data.
    fn read_block(&self, rect: PixelRect) -> Result<PointBlock, Self::Error>;

    fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width(), self.height())
    }
}

/// An in-memory block is an image whose origin is its rectangle's corner.
impl PointImage for PointBlock {
    type Error = Infallible;

    fn width(&self) -> usize {
        self.rect.right()
    }

    fn height(&self) -> usize {
        self.rect.bottom()
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn read_block(&self, rect: PixelRect) -> Result<PointBlock, Infallible> {
        let mut block = PointBlock::new(rect, self.channels);
        block.copy_from(self);
        Ok(block)
    }
}

impl<T: PointImage + ?Sized> PointImage for std::sync::Arc<T> {
    type Error = T::Error;

    fn width(&self) -> usize {
        (**self).width()
    }

    fn height(&self) -> usize {
        (**self).height()
    }

    fn num_channels(&self) -> usize {
        (**self).num_channels()
    }

    fn read_block(&self, rect: PixelRect) -> Result<PointBlock, T::Error> {
        (**self).read_block(rect)
    }
}
