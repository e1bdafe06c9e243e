use crate::{
    ellipsoid::Datum,
    error::ProjectionError,
    projection::{Projection, ProjectionParams},
};

/// Affine pixel to map transform without rotation terms. `origin` is the
/// corner of pixel (0, 0) and `pixel_height` is negative for north-up grids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn pixel_to_point(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        )
    }

    pub fn point_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_width: 1.0,
            pixel_height: -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeoReference {
    pub datum: Datum,
    pub projection: Projection,
    pub transform: GeoTransform,
    /// Source text this georeference was read from, if any.
    pub wkt: Option<String>,
}

impl GeoReference {
    pub fn new(datum: Datum, projection: Projection) -> Self {
        Self {
            datum,
            projection,
            transform: GeoTransform::default(),
            wkt: None,
        }
    }

    pub fn is_projected(&self) -> bool {
        !self.projection.is_geographic()
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn point_to_lonlat(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        self.projection.inverse(&self.datum, x, y)
    }

    pub fn lonlat_to_point(&self, lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
        self.projection.forward(&self.datum, lon, lat)
    }

    pub fn pixel_to_point(&self, col: f64, row: f64) -> (f64, f64) {
        self.transform.pixel_to_point(col, row)
    }

    pub fn point_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        self.transform.point_to_pixel(x, y)
    }

    pub fn to_proj_string(&self) -> String {
        self.projection.to_proj_string(&self.datum)
    }

    /// Builds a georeference from a PROJ string. The datum defaults to WGS84
    /// when the string names none.
    pub fn from_proj_string(proj: &str) -> Result<Self, ProjectionError> {
        let datum = Datum::from_proj_string(proj)?.unwrap_or_default();
        let projection = if proj.contains("+proj=longlat") || proj.contains("+proj=latlong") {
            Projection::Geographic
        } else if let Some(zone) = proj_value(proj, "zone").filter(|_| proj.contains("+proj=utm")) {
            let zone: u8 = zone
                .parse()
                .map_err(|_| ProjectionError::InvalidUtmZone(zone.to_string()))?;
            Projection::utm(zone, !proj.contains("+south"))?
        } else {
            Projection::Proj4(proj.trim().to_string())
        };
        Ok(Self {
            datum,
            projection,
            transform: GeoTransform::default(),
            wkt: Some(proj.to_string()),
        })
    }

    /// Reads the subset of OGC WKT found in LAS headers: the spheroid and
    /// either a geographic system or a UTM zone. Other projected systems are
    /// handed to PROJ only if the WKT carries a PROJ4 extension node.
    pub fn from_wkt(wkt: &str) -> Result<Self, ProjectionError> {
        let datum = parse_spheroid(wkt).unwrap_or_default();
        let upper = wkt.to_ascii_uppercase();

        let projection = if !upper.contains("PROJCS[") && upper.contains("GEOGCS[") {
            Projection::Geographic
        } else if let Some((zone, north)) = parse_utm_zone(&upper) {
            Projection::utm(zone, north)?
        } else if let Some(proj) = parse_proj4_extension(wkt) {
            Projection::Proj4(proj)
        } else {
            return Err(ProjectionError::UnknownProjection(
                wkt.chars().take(80).collect(),
            ));
        };

        Ok(Self {
            datum,
            projection,
            transform: GeoTransform::default(),
            wkt: Some(wkt.to_string()),
        })
    }

    pub fn params(&self) -> Option<&ProjectionParams> {
        match &self.projection {
            Projection::Sinusoidal(p)
            | Projection::Mercator(p)
            | Projection::TransverseMercator(p)
            | Projection::Orthographic(p)
            | Projection::Stereographic(p)
            | Projection::ObliqueStereographic(p)
            | Projection::Gnomonic(p)
            | Projection::LambertAzimuthal(p) => Some(p),
            _ => None,
        }
    }
}

fn proj_value<'a>(proj: &'a str, key: &str) -> Option<&'a str> {
    proj.split_whitespace().find_map(|token| {
        token
            .trim_start_matches('+')
            .split_once('=')
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
    })
}

fn parse_spheroid(wkt: &str) -> Option<Datum> {
    let start = wkt.to_ascii_uppercase().find("SPHEROID[")? + "SPHEROID[".len();
    let body = &wkt[start..];
    let body = &body[..body.find(']')?];
    let mut fields = body.split(',').map(str::trim);
    let name = fields.next()?.trim_matches('"').to_string();
    let a: f64 = fields.next()?.parse().ok()?;
    let inv_f: f64 = fields.next()?.parse().ok()?;
    let b = if inv_f == 0.0 { a } else { a * (1.0 - 1.0 / inv_f) };
    Some(Datum::new(name, a, b))
}

fn parse_utm_zone(upper_wkt: &str) -> Option<(u8, bool)> {
    let start = upper_wkt.find("UTM ZONE ").or_else(|| upper_wkt.find("UTM_ZONE_"))? + 9;
    let rest = &upper_wkt[start..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let zone: u8 = digits.parse().ok()?;
    let north = match rest[digits.len()..].chars().next()? {
        'N' => true,
        'S' => false,
        _ => return None,
    };
    Some((zone, north))
}

fn parse_proj4_extension(wkt: &str) -> Option<String> {
    let start = wkt.find("\"PROJ4\"")? + "\"PROJ4\"".len();
    let rest = &wkt[start..];
    let open = rest.find('"')? + 1;
    let close = rest[open..].find('"')? + open;
    Some(rest[open..close].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const UTM_WKT: &str = r#"PROJCS["WGS 84 / UTM zone 15N",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"]]"#;

    #[test]
    fn utm_from_wkt() {
        let georef = GeoReference::from_wkt(UTM_WKT).unwrap();
        assert_eq!(georef.projection, Projection::Utm { zone: 15, north: true });
        assert!((georef.datum.semi_minor_axis - 6356752.314245).abs() < 1e-3);
        assert!(georef.is_projected());
    }

    #[test]
    fn geographic_from_wkt() {
        let wkt = r#"GEOGCS["Moon 2000",DATUM["D_Moon_2000",SPHEROID["Moon_2000_IAU_IAG",1737400.0,0.0]]]"#;
        let georef = GeoReference::from_wkt(wkt).unwrap();
        assert!(!georef.is_projected());
        assert!(georef.datum.is_sphere());
        assert_eq!(georef.datum.semi_major_axis, 1737400.0);
    }

    #[test]
    fn utm_from_proj_string() {
        let georef = GeoReference::from_proj_string("+proj=utm +zone=23 +south +datum=WGS84").unwrap();
        assert_eq!(georef.projection, Projection::Utm { zone: 23, north: false });
    }

    #[test]
    fn pixel_point_round_trip() {
        let mut georef = GeoReference::default();
        georef.set_transform(GeoTransform {
            origin_x: 100.0,
            origin_y: 50.0,
            pixel_width: 2.0,
            pixel_height: -2.0,
        });
        let (x, y) = georef.pixel_to_point(3.0, 4.0);
        assert_eq!((x, y), (106.0, 42.0));
        assert_eq!(georef.point_to_pixel(x, y), (3.0, 4.0));
    }
}
