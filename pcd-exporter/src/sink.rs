use std::path::Path;

use pcd_core::pointcloud::block::PixelRect;
use pcd_rasterizer::Raster;
use projection_transform::GeoReference;

use crate::error::ExportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Float32,
    /// Values are rounded and clamped to 0..=255.
    UInt8,
}

/// What a sink needs to know about a raster before its pixels arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub format: SampleFormat,
    pub nodata: Option<f64>,
    /// Output georeference; its transform places the pixels.
    pub georef: Option<GeoReference>,
}

impl RasterMetadata {
    pub fn for_raster(raster: &Raster, format: SampleFormat, georef: Option<&GeoReference>) -> Self {
        Self {
            width: raster.width,
            height: raster.height,
            channels: raster.channels,
            format,
            nodata: Some(raster.nodata as f64),
            georef: georef.cloned(),
        }
    }
}

/// Raster output driver. Pixels are pulled from `tile`, which returns the
/// `channels` interleaved values of the requested rectangle in row-major
/// order.
pub trait RasterSink {
    fn write(
        &mut self,
        path: &Path,
        metadata: &RasterMetadata,
        tile: &dyn Fn(PixelRect) -> Vec<f32>,
    ) -> Result<(), ExportError>;
}

/// Writes a whole in-memory raster through `sink`.
pub fn write_raster(
    sink: &mut dyn RasterSink,
    path: &Path,
    raster: &Raster,
    format: SampleFormat,
    georef: Option<&GeoReference>,
) -> Result<(), ExportError> {
    let metadata = RasterMetadata::for_raster(raster, format, georef);
    log::info!("writing {} ({}x{}x{})", path.display(), raster.width, raster.height, raster.channels);
    sink.write(path, &metadata, &|rect| raster.tile(rect))
}
