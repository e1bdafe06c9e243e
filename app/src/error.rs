use pcd_chipper::ChipperError;
use pcd_exporter::ExportError;
use pcd_parser::{CsvError, ReaderError};
use pcd_rasterizer::RasterizeError;
use pcd_transformer::TransformError;
use projection_transform::ProjectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    Input(String),
    #[error(transparent)]
    Csv(#[from] CsvError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Chipper(#[from] ChipperError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Rasterize(#[from] RasterizeError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
