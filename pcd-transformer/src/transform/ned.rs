use nalgebra::Vector3;
use pcd_core::pointcloud::{
    block::PointBlock,
    point::{is_valid_cartesian, Point},
};
use projection_transform::{
    cartesian::{cartesian_to_geodetic, lonlat_to_ned_matrix},
    Datum,
};

use super::Transform;
use crate::error::TransformError;

/// Re-expresses the 3-vector error of 6-channel cartesian clouds in the
/// local North-East-Down frame of each point. Other clouds pass through.
pub struct ErrorToNed {
    datum: Datum,
}

impl ErrorToNed {
    pub fn new(datum: Datum) -> Self {
        Self { datum }
    }
}

impl Transform for ErrorToNed {
    fn transform(&self, mut block: PointBlock) -> Result<PointBlock, TransformError> {
        if block.channels != 6 {
            return Ok(block);
        }
        for pixel in block.pixels_mut() {
            let point = Point::new(pixel[0], pixel[1], pixel[2]);
            if !is_valid_cartesian(&point) {
                continue;
            }
            let llh = cartesian_to_geodetic(&self.datum, &point);
            let error = Vector3::new(pixel[3], pixel[4], pixel[5]);
            let ned = lonlat_to_ned_matrix(llh.x, llh.y) * error;
            pixel[3..6].copy_from_slice(ned.as_slice());
        }
        Ok(block)
    }
}
