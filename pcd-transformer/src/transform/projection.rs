use pcd_core::pointcloud::{block::PointBlock, point::nodata_geodetic};
use projection_transform::{GeoReference, ProjectionError};

use super::Transform;
use crate::error::TransformError;

/// (lon, lat, height) to (easting, northing, height) in the projection of
/// the output georeference. Points the projection cannot represent, such as
/// the far side of an orthographic view, become no-data.
pub struct GeodeticToProjected {
    georef: GeoReference,
}

impl GeodeticToProjected {
    pub fn new(georef: GeoReference) -> Self {
        Self { georef }
    }
}

impl Transform for GeodeticToProjected {
    fn transform(&self, mut block: PointBlock) -> Result<PointBlock, TransformError> {
        if !self.georef.is_projected() {
            return Ok(block);
        }
        for pixel in block.pixels_mut() {
            if pixel[2].is_nan() {
                continue;
            }
            match self.georef.lonlat_to_point(pixel[0], pixel[1]) {
                Ok((x, y)) if x.is_finite() && y.is_finite() => {
                    pixel[0] = x;
                    pixel[1] = y;
                }
                Ok(_) | Err(ProjectionError::OutOfDomain(..)) => {
                    pixel[..3].copy_from_slice(nodata_geodetic().as_slice());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::{block::PixelRect, point::Point};
    use projection_transform::{Datum, Projection, ProjectionParams};

    use super::*;

    #[test]
    fn far_side_of_orthographic_is_nodata() {
        let georef = GeoReference::new(Datum::moon(), Projection::Orthographic(ProjectionParams::default()));
        let mut block = PointBlock::new(PixelRect::new(0, 0, 2, 1), 3);
        block.set_point(0, 0, &Point::new(0.0, 0.0, 5.0));
        block.set_point(1, 0, &Point::new(180.0, 0.0, 5.0));

        let block = GeodeticToProjected::new(georef).transform(block).unwrap();
        assert!(block.point(0, 0).x.abs() < 1e-6 && block.point(0, 0).y.abs() < 1e-6);
        assert_eq!(block.point(0, 0).z, 5.0);
        assert!(block.point(1, 0).z.is_nan());
    }

    #[test]
    fn geographic_output_is_unchanged() {
        let georef = GeoReference::new(Datum::wgs84(), Projection::Geographic);
        let block = PointBlock::filled(PixelRect::new(0, 0, 1, 1), 3, 2.0);
        let out = GeodeticToProjected::new(georef).transform(block.clone()).unwrap();
        assert_eq!(out, block);
    }
}
