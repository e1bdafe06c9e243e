use pcd_core::pointcloud::{
    block::PointBlock,
    point::{is_valid_cartesian, is_valid_geodetic, nodata_geodetic, Point},
};
use projection_transform::{
    cartesian::{cartesian_to_geodetic, normalize_longitude},
    Datum,
};

use super::Transform;
use crate::error::TransformError;

/// Cartesian XYZ to (lon, lat, height). No-data changes from the zero
/// vector to a NaN height.
pub struct CartesianToGeodetic {
    datum: Datum,
}

impl CartesianToGeodetic {
    pub fn new(datum: Datum) -> Self {
        Self { datum }
    }
}

impl Transform for CartesianToGeodetic {
    fn transform(&self, mut block: PointBlock) -> Result<PointBlock, TransformError> {
        for pixel in block.pixels_mut() {
            let point = Point::new(pixel[0], pixel[1], pixel[2]);
            let llh = if is_valid_cartesian(&point) {
                cartesian_to_geodetic(&self.datum, &point)
            } else {
                nodata_geodetic()
            };
            pixel[..3].copy_from_slice(llh.as_slice());
        }
        Ok(block)
    }
}

/// Puts longitudes on the branch within 180 degrees of `center`.
pub struct RecenterLongitude {
    center: f64,
}

impl RecenterLongitude {
    pub fn new(center: f64) -> Self {
        Self { center }
    }
}

impl Transform for RecenterLongitude {
    fn transform(&self, mut block: PointBlock) -> Result<PointBlock, TransformError> {
        for pixel in block.pixels_mut() {
            if !pixel[2].is_nan() {
                pixel[0] = normalize_longitude(pixel[0], self.center);
            }
        }
        Ok(block)
    }
}

/// Shifts valid geodetic points by (lon, lat, height).
pub struct OffsetTransform {
    offset: Point,
}

impl OffsetTransform {
    pub fn new(lon: f64, lat: f64, height: f64) -> Self {
        Self {
            offset: Point::new(lon, lat, height),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.offset == Point::zeros()
    }
}

impl Transform for OffsetTransform {
    fn transform(&self, mut block: PointBlock) -> Result<PointBlock, TransformError> {
        for pixel in block.pixels_mut() {
            let point = Point::new(pixel[0], pixel[1], pixel[2]);
            if is_valid_geodetic(&point) {
                pixel[..3].copy_from_slice((point + self.offset).as_slice());
            }
        }
        Ok(block)
    }
}
