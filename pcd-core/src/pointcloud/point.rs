use nalgebra::Vector3;

/// Cartesian XYZ, (lon, lat, height) or (easting, northing, height)
/// depending on the stage of the pipeline.
pub type Point = Vector3<f64>;

/// No-data marker of a cartesian cloud.
pub fn nodata_cartesian() -> Point {
    Point::zeros()
}

/// No-data marker of a geodetic or projected cloud.
pub fn nodata_geodetic() -> Point {
    Point::new(0.0, 0.0, f64::NAN)
}

pub fn is_valid_cartesian(point: &Point) -> bool {
    *point != Point::zeros()
}

pub fn is_valid_geodetic(point: &Point) -> bool {
    !point.z.is_nan()
}

// Axis aligned bounds of a set of points. An empty volume has min > max.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingVolume {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingVolume {
    pub fn empty() -> Self {
        Self {
            min: [f64::MAX, f64::MAX, f64::MAX],
            max: [f64::MIN, f64::MIN, f64::MIN],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0] || self.min[1] > self.max[1]
    }

    pub fn grow(&mut self, point: &Point) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(point[i]);
            self.max[i] = self.max[i].max(point[i]);
        }
    }

    pub fn merge(&mut self, other: &BoundingVolume) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    /// Whether the xy footprint overlaps the closed rectangle [min, max].
    pub fn intersects_xy(&self, min: [f64; 2], max: [f64; 2]) -> bool {
        !self.is_empty()
            && self.min[0] <= max[0]
            && self.max[0] >= min[0]
            && self.min[1] <= max[1]
            && self.max[1] >= min[1]
    }
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<Point> for BoundingVolume {
    fn from_iter<T: IntoIterator<Item = Point>>(iter: T) -> Self {
        let mut bbox = Self::empty();
        for p in iter {
            bbox.grow(&p);
        }
        bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodata_markers() {
        assert!(!is_valid_cartesian(&nodata_cartesian()));
        assert!(!is_valid_geodetic(&nodata_geodetic()));
        assert!(is_valid_cartesian(&Point::new(0.0, 0.0, 1.0)));
        assert!(is_valid_geodetic(&Point::new(0.0, 0.0, 0.0)));
    }

    #[test]
    fn bounding_volume_grows() {
        let bbox: BoundingVolume = [Point::new(1.0, 2.0, 3.0), Point::new(-1.0, 5.0, 0.0)]
            .into_iter()
            .collect();
        assert_eq!(bbox.min, [-1.0, 2.0, 0.0]);
        assert_eq!(bbox.max, [1.0, 5.0, 3.0]);
        assert!(bbox.intersects_xy([0.5, 4.5], [10.0, 10.0]));
        assert!(!bbox.intersects_xy([1.5, 0.0], [10.0, 10.0]));
        assert!(BoundingVolume::empty().is_empty());
    }
}
