use nalgebra::Matrix3;
use projection_transform::GeoReference;

use crate::transform::{
    geodetic::{CartesianToGeodetic, OffsetTransform, RecenterLongitude},
    ned::ErrorToNed,
    projection::GeodeticToProjected,
    rotation::RotationTransform,
    CompositeTransform, Transform,
};

pub trait TransformBuilder {
    fn build(&self) -> Box<dyn Transform>;
}

/// The chain taking a cartesian cloud to the output georeference:
/// error to NED, rotation, cartesian to geodetic, longitude recentering,
/// offset and projection.
pub struct DemTransformBuilder {
    georef: GeoReference,
    rotation: Option<Matrix3<f64>>,
    center_longitude: f64,
    offset: [f64; 3],
}

impl DemTransformBuilder {
    pub fn new(georef: GeoReference) -> Self {
        Self {
            georef,
            rotation: None,
            center_longitude: 0.0,
            offset: [0.0; 3],
        }
    }

    pub fn rotation(mut self, matrix: Matrix3<f64>) -> Self {
        self.rotation = Some(matrix);
        self
    }

    pub fn center_longitude(mut self, center: f64) -> Self {
        self.center_longitude = center;
        self
    }

    /// Offset in (lon, lat, height) applied before projecting.
    pub fn offset(mut self, lon: f64, lat: f64, height: f64) -> Self {
        self.offset = [lon, lat, height];
        self
    }
}

impl TransformBuilder for DemTransformBuilder {
    fn build(&self) -> Box<dyn Transform> {
        let datum = self.georef.datum.clone();
        let mut transforms: Vec<Box<dyn Transform>> = vec![Box::new(ErrorToNed::new(datum.clone()))];

        if let Some(matrix) = self.rotation {
            transforms.push(Box::new(RotationTransform::new(matrix)));
        }
        transforms.push(Box::new(CartesianToGeodetic::new(datum)));
        transforms.push(Box::new(RecenterLongitude::new(self.center_longitude)));

        let offset = OffsetTransform::new(self.offset[0], self.offset[1], self.offset[2]);
        if !offset.is_zero() {
            transforms.push(Box::new(offset));
        }
        if self.georef.is_projected() {
            transforms.push(Box::new(GeodeticToProjected::new(self.georef.clone())));
        }

        log::debug!("built a chain of {} point transforms", transforms.len());
        Box::new(CompositeTransform::new(transforms))
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::{
        block::{PixelRect, PointBlock},
        point::Point,
    };
    use projection_transform::{cartesian::geodetic_to_cartesian, Datum, Projection};

    use super::*;

    #[test]
    fn cartesian_to_offset_lonlat() {
        let georef = GeoReference::new(Datum::wgs84(), Projection::Geographic);
        let transform = DemTransformBuilder::new(georef)
            .center_longitude(180.0)
            .offset(0.0, 0.0, -100.0)
            .build();

        let mut block = PointBlock::new(PixelRect::new(0, 0, 2, 1), 3);
        let xyz = geodetic_to_cartesian(&Datum::wgs84(), &Point::new(-90.0, 10.0, 150.0));
        block.set_point(0, 0, &xyz);

        let block = transform.transform(block).unwrap();
        assert!((block.point(0, 0) - Point::new(270.0, 10.0, 50.0)).norm() < 1e-6);
        assert!(block.point(1, 0).z.is_nan());
    }
}
