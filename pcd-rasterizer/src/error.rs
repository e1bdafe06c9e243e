use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterizeError {
    #[error("failed to read the point cloud: {0}")]
    Source(Box<dyn std::error::Error + Send + Sync>),
    #[error("no valid error samples found in the point cloud")]
    NoValidSamples,
    #[error("the point cloud has no valid points")]
    EmptyCloud,
    #[error("invalid output spacing {0}")]
    InvalidSpacing(f64),
    #[error("channel {channel} is out of range for a cloud with {channels} channels")]
    InvalidChannel { channel: usize, channels: usize },
    #[error("texture is {texture:?} pixels but the point cloud is {cloud:?}")]
    TextureSize {
        texture: (usize, usize),
        cloud: (usize, usize),
    },
}

impl RasterizeError {
    pub(crate) fn from_source<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        RasterizeError::Source(Box::new(e))
    }
}
