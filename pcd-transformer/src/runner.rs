use pcd_core::pointcloud::{
    block::{PixelRect, PointBlock},
    image::PointImage,
};

use crate::{error::TransformError, transform::Transform};

/// A point-cloud image whose blocks are transformed as they are read.
pub struct TransformedCloud<I: PointImage> {
    cloud: I,
    transform: Box<dyn Transform>,
}

impl<I: PointImage> TransformedCloud<I> {
    pub fn new(cloud: I, transform: Box<dyn Transform>) -> Self {
        Self { cloud, transform }
    }

    pub fn inner(&self) -> &I {
        &self.cloud
    }
}

impl<I: PointImage> PointImage for TransformedCloud<I> {
    type Error = TransformError;

    fn width(&self) -> usize {
        self.cloud.width()
    }

    fn height(&self) -> usize {
        self.cloud.height()
    }

    fn num_channels(&self) -> usize {
        self.cloud.num_channels()
    }

    fn read_block(&self, rect: PixelRect) -> Result<PointBlock, TransformError> {
        let block = self
            .cloud
            .read_block(rect)
            .map_err(|e| TransformError::Source(Box::new(e)))?;
        self.transform.transform(block)
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::point::Point;

    use super::*;
    use crate::transform::{geodetic::OffsetTransform, CompositeTransform};

    #[test]
    fn blocks_are_transformed_on_read() {
        let mut image = PointBlock::new(PixelRect::new(0, 0, 3, 3), 3);
        image.set_point(1, 1, &Point::new(1.0, 2.0, 3.0));
        let transform = CompositeTransform::new(vec![
            Box::new(OffsetTransform::new(1.0, 0.0, 0.0)),
            Box::new(OffsetTransform::new(0.0, 0.0, 1.0)),
        ]);
        let cloud = TransformedCloud::new(image, Box::new(transform));
        assert_eq!((cloud.width(), cloud.height(), cloud.num_channels()), (3, 3, 3));

        let block = cloud.read_block(PixelRect::new(1, 1, 1, 1)).unwrap();
        assert_eq!(block.point(0, 0), Point::new(2.0, 2.0, 4.0));
    }
}
