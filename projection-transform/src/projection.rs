use std::cell::RefCell;

use proj4rs::proj::Proj;

use crate::{ellipsoid::Datum, error::ProjectionError};

thread_local! {
    static PROJECTION_CACHE: RefCell<Option<(String, Proj, Proj)>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionParams {
    pub center_longitude: f64,
    pub center_latitude: f64,
    pub scale: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            center_longitude: 0.0,
            center_latitude: 0.0,
            scale: 1.0,
            false_easting: 0.0,
            false_northing: 0.0,
        }
    }
}

/// Map projection of an output grid. Coordinates in and out of `forward`
/// and `inverse` are degrees on the geographic side and meters on the
/// projected side, except for `Geographic` which is degrees on both.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    #[default]
    Geographic,
    Sinusoidal(ProjectionParams),
    Mercator(ProjectionParams),
    TransverseMercator(ProjectionParams),
    Orthographic(ProjectionParams),
    Stereographic(ProjectionParams),
    ObliqueStereographic(ProjectionParams),
    Gnomonic(ProjectionParams),
    LambertAzimuthal(ProjectionParams),
    Utm { zone: u8, north: bool },
    Proj4(String),
}

impl Projection {
    pub fn from_name(name: &str, params: ProjectionParams) -> Result<Self, ProjectionError> {
        let projection = match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "geographic" | "plate-carree" | "longlat" => Self::Geographic,
            "sinusoidal" => Self::Sinusoidal(params),
            "mercator" => Self::Mercator(params),
            "transverse-mercator" => Self::TransverseMercator(params),
            "orthographic" => Self::Orthographic(params),
            "stereographic" => Self::Stereographic(params),
            "oblique-stereographic" => Self::ObliqueStereographic(params),
            "gnomonic" => Self::Gnomonic(params),
            "lambert-azimuthal" => Self::LambertAzimuthal(params),
            _ => return Err(ProjectionError::UnknownProjection(name.to_string())),
        };
        Ok(projection)
    }

    pub fn utm(zone: u8, north: bool) -> Result<Self, ProjectionError> {
        if !(1..=60).contains(&zone) {
            return Err(ProjectionError::InvalidUtmZone(zone.to_string()));
        }
        Ok(Self::Utm { zone, north })
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Self::Geographic)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Geographic => "geographic",
            Self::Sinusoidal(_) => "sinusoidal",
            Self::Mercator(_) => "mercator",
            Self::TransverseMercator(_) => "transverse mercator",
            Self::Orthographic(_) => "orthographic",
            Self::Stereographic(_) => "stereographic",
            Self::ObliqueStereographic(_) => "oblique stereographic",
            Self::Gnomonic(_) => "gnomonic",
            Self::LambertAzimuthal(_) => "lambert azimuthal",
            Self::Utm { .. } => "UTM",
            Self::Proj4(_) => "PROJ",
        }
    }

    /// PROJ string describing this projection on `datum`.
    pub fn to_proj_string(&self, datum: &Datum) -> String {
        let ellps = datum.proj_ellipsoid_params();
        let with_params = |kind: &str, p: &ProjectionParams| {
            format!(
                "+proj={} +lat_0={} +lon_0={} +k={} +x_0={} +y_0={} {} +units=m +no_defs",
                kind,
                p.center_latitude,
                p.center_longitude,
                p.scale,
                p.false_easting,
                p.false_northing,
                ellps
            )
        };
        match self {
            Self::Geographic => format!("+proj=longlat {} +no_defs", ellps),
            Self::Sinusoidal(p) => with_params("sinu", p),
            Self::Mercator(p) => with_params("merc", p),
            Self::TransverseMercator(p) => with_params("tmerc", p),
            Self::Orthographic(p) => with_params("ortho", p),
            Self::Stereographic(p) => with_params("stere", p),
            Self::ObliqueStereographic(p) => with_params("sterea", p),
            Self::Gnomonic(p) => with_params("gnom", p),
            Self::LambertAzimuthal(p) => with_params("laea", p),
            Self::Utm { zone, north } => format!(
                "+proj=utm +zone={}{} {} +units=m +no_defs",
                zone,
                if *north { "" } else { " +south" },
                ellps
            ),
            Self::Proj4(s) => s.clone(),
        }
    }

    pub fn forward(&self, datum: &Datum, lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
        let r = datum.semi_major_axis;
        match self {
            Self::Geographic => Ok((lon, lat)),
            Self::Sinusoidal(p) => {
                let lat_r = lat.to_radians();
                let dlon = (lon - p.center_longitude).to_radians();
                Ok((
                    r * p.scale * dlon * lat_r.cos() + p.false_easting,
                    r * p.scale * lat_r + p.false_northing,
                ))
            }
            Self::Orthographic(p) | Self::Gnomonic(p) => {
                let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
                let (sin_lat0, cos_lat0) = p.center_latitude.to_radians().sin_cos();
                let (sin_dlon, cos_dlon) = (lon - p.center_longitude).to_radians().sin_cos();
                let cos_c = sin_lat0 * sin_lat + cos_lat0 * cos_lat * cos_dlon;
                let x = cos_lat * sin_dlon;
                let y = cos_lat0 * sin_lat - sin_lat0 * cos_lat * cos_dlon;
                let k = if matches!(self, Self::Gnomonic(_)) {
                    if cos_c <= 0.0 {
                        return Err(ProjectionError::OutOfDomain(lon, lat, self.name()));
                    }
                    1.0 / cos_c
                } else {
                    if cos_c < 0.0 {
                        return Err(ProjectionError::OutOfDomain(lon, lat, self.name()));
                    }
                    1.0
                };
                Ok((
                    r * p.scale * k * x + p.false_easting,
                    r * p.scale * k * y + p.false_northing,
                ))
            }
            _ => self.proj_forward(datum, lon, lat),
        }
    }

    pub fn inverse(&self, datum: &Datum, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let r = datum.semi_major_axis;
        match self {
            Self::Geographic => Ok((x, y)),
            Self::Sinusoidal(p) => {
                let lat_r = (y - p.false_northing) / (r * p.scale);
                let cos_lat = lat_r.cos();
                let lon = if cos_lat.abs() < 1e-12 {
                    p.center_longitude
                } else {
                    p.center_longitude + ((x - p.false_easting) / (r * p.scale * cos_lat)).to_degrees()
                };
                Ok((lon, lat_r.to_degrees()))
            }
            Self::Orthographic(p) | Self::Gnomonic(p) => {
                let xs = (x - p.false_easting) / (r * p.scale);
                let ys = (y - p.false_northing) / (r * p.scale);
                let rho = xs.hypot(ys);
                if rho < 1e-15 {
                    return Ok((p.center_longitude, p.center_latitude));
                }
                let c = if matches!(self, Self::Gnomonic(_)) {
                    rho.atan()
                } else {
                    if rho > 1.0 {
                        return Err(ProjectionError::OutOfDomain(x, y, self.name()));
                    }
                    rho.asin()
                };
                let (sin_c, cos_c) = c.sin_cos();
                let (sin_lat0, cos_lat0) = p.center_latitude.to_radians().sin_cos();
                let lat = (cos_c * sin_lat0 + ys * sin_c * cos_lat0 / rho).asin();
                let lon = p.center_longitude.to_radians()
                    + (xs * sin_c).atan2(rho * cos_lat0 * cos_c - ys * sin_lat0 * sin_c);
                Ok((lon.to_degrees(), lat.to_degrees()))
            }
            _ => self.proj_inverse(datum, x, y),
        }
    }

    fn proj_forward(&self, datum: &Datum, lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
        let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
        with_projections(&self.to_proj_string(datum), datum, |projected, geographic| {
            proj4rs::transform::transform(geographic, projected, &mut point).map_err(|e| {
                ProjectionError::Proj {
                    context: "forward",
                    message: format!("{e:?}"),
                }
            })
        })?;
        Ok((point.0, point.1))
    }

    fn proj_inverse(&self, datum: &Datum, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let mut point = (x, y, 0.0);
        with_projections(&self.to_proj_string(datum), datum, |projected, geographic| {
            proj4rs::transform::transform(projected, geographic, &mut point).map_err(|e| {
                ProjectionError::Proj {
                    context: "inverse",
                    message: format!("{e:?}"),
                }
            })
        })?;
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    }
}

fn with_projections<R>(
    projected: &str,
    datum: &Datum,
    f: impl FnOnce(&Proj, &Proj) -> Result<R, ProjectionError>,
) -> Result<R, ProjectionError> {
    PROJECTION_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let geographic = Projection::Geographic.to_proj_string(datum);
        let key = format!("{}|{}", projected, geographic);

        let cached = matches!(&*cache, Some((cached_key, _, _)) if *cached_key == key);
        if !cached {
            let make = |s: &str| {
                Proj::from_proj_string(s).map_err(|e| ProjectionError::Proj {
                    context: "init",
                    message: format!("{s}: {e:?}"),
                })
            };
            log::debug!("initializing projection {} on this thread", projected);
            *cache = Some((key, make(projected)?, make(&geographic)?));
        }

        match &*cache {
            Some((_, projected, geographic)) => f(projected, geographic),
            None => Err(ProjectionError::Proj {
                context: "cache",
                message: "projection cache is empty".to_string(),
            }),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sinusoidal_round_trip() {
        let datum = Datum::mars();
        let proj = Projection::Sinusoidal(ProjectionParams {
            center_longitude: 10.0,
            ..Default::default()
        });
        let (x, y) = proj.forward(&datum, 12.0, -4.0).unwrap();
        let (lon, lat) = proj.inverse(&datum, x, y).unwrap();
        assert!((lon - 12.0).abs() < 1e-9);
        assert!((lat + 4.0).abs() < 1e-9);
    }

    #[test]
    fn orthographic_center_maps_to_false_origin() {
        let datum = Datum::moon();
        let proj = Projection::Orthographic(ProjectionParams {
            center_longitude: 30.0,
            center_latitude: 15.0,
            false_easting: 100.0,
            false_northing: -50.0,
            ..Default::default()
        });
        let (x, y) = proj.forward(&datum, 30.0, 15.0).unwrap();
        assert!((x - 100.0).abs() < 1e-6 && (y + 50.0).abs() < 1e-6);

        let (x, y) = proj.forward(&datum, 31.0, 14.5).unwrap();
        let (lon, lat) = proj.inverse(&datum, x, y).unwrap();
        assert!((lon - 31.0).abs() < 1e-9 && (lat - 14.5).abs() < 1e-9);
    }

    #[test]
    fn gnomonic_rejects_far_hemisphere() {
        let proj = Projection::Gnomonic(ProjectionParams::default());
        assert!(proj.forward(&Datum::wgs84(), 120.0, 0.0).is_err());
    }

    #[test]
    fn utm_zone_bounds() {
        assert!(Projection::utm(0, true).is_err());
        assert!(Projection::utm(61, true).is_err());
        assert!(Projection::utm(15, false).is_ok());
    }

    #[test]
    fn proj_string_for_utm() {
        let s = Projection::Utm { zone: 15, north: false }.to_proj_string(&Datum::wgs84());
        assert!(s.starts_with("+proj=utm +zone=15 +south"));
    }

    #[test]
    fn unknown_projection_name() {
        assert!(Projection::from_name("robinson", ProjectionParams::default()).is_err());
        assert_eq!(
            Projection::from_name("Transverse_Mercator", ProjectionParams::default()).unwrap(),
            Projection::TransverseMercator(ProjectionParams::default())
        );
    }
}
