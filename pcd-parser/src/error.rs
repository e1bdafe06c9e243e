use std::io;

use projection_transform::ProjectionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("could not parse CSV format '{format}': {reason}")]
    Format { format: String, reason: String },

    #[error("failed to read line: {0}")]
    Parse(String),

    #[error("CSV data with easting and northing needs a UTM zone or a PROJ string")]
    MissingGeoreference,

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Las(#[from] las::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("no current point, read_next_point has not succeeded")]
    NoCurrentPoint,

    #[error("point source {0} is exhausted")]
    Exhausted(String),

    #[error("unsupported input file: {0}")]
    UnsupportedInput(String),

    #[error("{path}: {reason}")]
    InvalidRaster { path: String, reason: String },
}
