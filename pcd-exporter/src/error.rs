use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("rasters with {0} channels cannot be written")]
    UnsupportedChannels(usize),
    #[error("tile callback returned {actual} values, expected {expected}")]
    TileSize { expected: usize, actual: usize },
}
