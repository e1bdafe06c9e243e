use pcd_core::pointcloud::block::PointBlock;

use crate::error::TransformError;

pub mod geodetic;
pub mod ned;
pub mod projection;
pub mod rotation;

/// A per-pixel operation on blocks of a point-cloud image.
pub trait Transform: Send + Sync {
    fn transform(&self, block: PointBlock) -> Result<PointBlock, TransformError>;
}

/// Applies its transforms in order.
pub struct CompositeTransform {
    transforms: Vec<Box<dyn Transform>>,
}

impl CompositeTransform {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl Transform for CompositeTransform {
    fn transform(&self, block: PointBlock) -> Result<PointBlock, TransformError> {
        self.transforms
            .iter()
            .try_fold(block, |block, transform| transform.transform(block))
    }
}
