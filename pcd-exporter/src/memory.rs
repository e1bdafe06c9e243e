use std::path::{Path, PathBuf};

use pcd_core::pointcloud::block::PixelRect;
use pcd_rasterizer::Raster;

use crate::{
    error::ExportError,
    sink::{RasterMetadata, RasterSink},
};

/// Keeps written rasters in memory, keyed by their output path.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rasters: Vec<(PathBuf, RasterMetadata, Raster)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<(&RasterMetadata, &Raster)> {
        self.rasters
            .iter()
            .find(|(p, _, _)| p == path)
            .map(|(_, metadata, raster)| (metadata, raster))
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.rasters.iter().map(|(p, _, _)| p.as_path()).collect()
    }
}

impl RasterSink for MemorySink {
    fn write(
        &mut self,
        path: &Path,
        metadata: &RasterMetadata,
        tile: &dyn Fn(PixelRect) -> Vec<f32>,
    ) -> Result<(), ExportError> {
        let nodata = metadata.nodata.unwrap_or(f64::NAN) as f32;
        let mut raster = Raster::new(metadata.width, metadata.height, metadata.channels, nodata);
        let rect = raster.bounds();
        let values = tile(rect);
        if values.len() != raster.data.len() {
            return Err(ExportError::TileSize {
                expected: raster.data.len(),
                actual: values.len(),
            });
        }
        raster.data = values;
        self.rasters.retain(|(p, _, _)| p != path);
        self.rasters.push((path.to_path_buf(), metadata.clone(), raster));
        Ok(())
    }
}
