use pcd_parser::ReaderError;
use projection_transform::ProjectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChipperError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("tile {requested} requested out of order, expected tile {expected}")]
    OutOfOrder { requested: usize, expected: usize },
    #[error("chip size mismatch: {actual} points do not fit a region of {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("invalid chip layout: {0}")]
    InvalidLayout(String),
    #[error("no point cloud sources given")]
    NoSources,
    #[error("chipping thread stopped unexpectedly")]
    Disconnected,
}
