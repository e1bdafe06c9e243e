use projection_transform::ProjectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("invalid rotation order {0:?}, expected three of the axes x, y and z")]
    InvalidRotationOrder(String),
    #[error("failed to read the point cloud: {0}")]
    Source(Box<dyn std::error::Error + Send + Sync>),
}
