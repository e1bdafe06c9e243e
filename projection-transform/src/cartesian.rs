use nalgebra::{Matrix3, Vector3};

use crate::ellipsoid::Datum;

/// (lon, lat, height) in degrees and meters to body-fixed cartesian XYZ.
pub fn geodetic_to_cartesian(datum: &Datum, llh: &Vector3<f64>) -> Vector3<f64> {
    let a = datum.semi_major_axis;
    let b = datum.semi_minor_axis;
    let (sin_lat, cos_lat) = llh.y.to_radians().sin_cos();
    let (sin_lon, cos_lon) = llh.x.to_radians().sin_cos();
    let h = llh.z;

    let n = a * a / (a * a * cos_lat * cos_lat + b * b * sin_lat * sin_lat).sqrt();

    Vector3::new(
        (n + h) * cos_lat * cos_lon,
        (n + h) * cos_lat * sin_lon,
        (b * b / (a * a) * n + h) * sin_lat,
    )
}

/// Body-fixed cartesian XYZ to (lon, lat, height). Longitude is in [-180, 180].
///
/// The zero vector has no geodetic position; callers filter it out as
/// no-data first. It maps to a NaN height here instead of panicking.
pub fn cartesian_to_geodetic(datum: &Datum, xyz: &Vector3<f64>) -> Vector3<f64> {
    if *xyz == Vector3::zeros() {
        return Vector3::new(0.0, 0.0, f64::NAN);
    }

    let a = datum.semi_major_axis;
    let e2 = datum.eccentricity_squared();
    let p = xyz.x.hypot(xyz.y);
    let lon = xyz.y.atan2(xyz.x);

    if datum.is_sphere() {
        let lat = xyz.z.atan2(p);
        return Vector3::new(lon.to_degrees(), lat.to_degrees(), xyz.norm() - a);
    }

    // Height along the normal, stable from the equator to the poles.
    let height = |lat: f64| {
        let (sin_lat, cos_lat) = lat.sin_cos();
        p * cos_lat + xyz.z * sin_lat - a * (1.0 - e2 * sin_lat * sin_lat).sqrt()
    };

    let mut lat = xyz.z.atan2(p * (1.0 - e2));
    for _ in 0..10 {
        let sin_lat = lat.sin();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let next = xyz.z.atan2(p * (1.0 - e2 * n / (n + height(lat))));
        let converged = (next - lat).abs() < 1e-14;
        lat = next;
        if converged {
            break;
        }
    }
    let h = height(lat);

    Vector3::new(lon.to_degrees(), lat.to_degrees(), h)
}

/// Rotation from body-fixed cartesian to the local North-East-Down frame.
pub fn lonlat_to_ned_matrix(lon: f64, lat: f64) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon.to_radians().sin_cos();

    Matrix3::new(
        -sin_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lat,
        -sin_lon,
        cos_lon,
        0.0,
        -cos_lat * cos_lon,
        -cos_lat * sin_lon,
        -sin_lat,
    )
}

/// Moves `lon` by whole turns so that it lies within 180 degrees of `reference`.
pub fn normalize_longitude(lon: f64, reference: f64) -> f64 {
    lon + 360.0 * ((reference - lon) / 360.0).round()
}

/// Center of the longitude branch for a dataset whose mean cartesian X is `mean_x`.
/// A cloud on the far side of the body (negative X) is kept away from the
/// +/-180 seam by centering its longitudes on 180.
pub fn longitude_branch_center(mean_x: f64) -> f64 {
    if mean_x < 0.0 {
        180.0
    } else {
        0.0
    }
}
