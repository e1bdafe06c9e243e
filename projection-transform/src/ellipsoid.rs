use crate::error::ProjectionError;

/// Reference ellipsoid of a planetary body.
#[derive(Debug, Clone, PartialEq)]
pub struct Datum {
    pub name: String,
    pub semi_major_axis: f64,
    pub semi_minor_axis: f64,
}

impl Datum {
    pub fn new(name: impl Into<String>, semi_major_axis: f64, semi_minor_axis: f64) -> Self {
        Self {
            name: name.into(),
            semi_major_axis,
            semi_minor_axis,
        }
    }

    pub fn wgs84() -> Self {
        Self::new("WGS_1984", 6378137.0, 6356752.314245)
    }

    pub fn nad83() -> Self {
        Self::new("North_American_Datum_1983", 6378137.0, 6356752.314140)
    }

    pub fn wgs72() -> Self {
        Self::new("WGS_1972", 6378135.0, 6356750.52)
    }

    pub fn nad27() -> Self {
        Self::new("North_American_Datum_1927", 6378206.4, 6356583.8)
    }

    pub fn moon() -> Self {
        Self::new("D_MOON", 1737400.0, 1737400.0)
    }

    pub fn mars() -> Self {
        Self::new("D_MARS", 3396190.0, 3396190.0)
    }

    pub fn mola() -> Self {
        Self::new("MOLA", 3396000.0, 3396000.0)
    }

    /// Looks up a datum by one of its common names, ignoring case.
    pub fn from_name(name: &str) -> Result<Self, ProjectionError> {
        match name.to_ascii_lowercase().as_str() {
            "wgs_1984" | "wgs84" | "earth" => Ok(Self::wgs84()),
            "nad83" | "north_american_datum_1983" => Ok(Self::nad83()),
            "wgs72" | "wgs_1972" => Ok(Self::wgs72()),
            "nad27" | "north_american_datum_1927" => Ok(Self::nad27()),
            "d_moon" | "moon" => Ok(Self::moon()),
            "d_mars" | "mars" => Ok(Self::mars()),
            "mola" => Ok(Self::mola()),
            _ => Err(ProjectionError::UnknownDatum(name.to_string())),
        }
    }

    pub fn from_axes(semi_major_axis: f64, semi_minor_axis: f64) -> Result<Self, ProjectionError> {
        if !(semi_major_axis > 0.0 && semi_minor_axis > 0.0) {
            return Err(ProjectionError::InvalidAxes(semi_major_axis, semi_minor_axis));
        }
        Ok(Self::new("User Specified Datum", semi_major_axis, semi_minor_axis))
    }

    /// Extracts the ellipsoid from a PROJ string. Returns `None` when the
    /// string carries no ellipsoid information.
    pub fn from_proj_string(proj: &str) -> Result<Option<Self>, ProjectionError> {
        let mut a = None;
        let mut b = None;
        let mut rf = None;
        let mut named = None;

        for token in proj.split_whitespace() {
            let Some((key, value)) = token.trim_start_matches('+').split_once('=') else {
                continue;
            };
            let number = || {
                value
                    .parse::<f64>()
                    .map_err(|_| ProjectionError::UnknownDatum(token.to_string()))
            };
            match key {
                "a" => a = Some(number()?),
                "b" => b = Some(number()?),
                "R" => {
                    let r = number()?;
                    a = Some(r);
                    b = Some(r);
                }
                "rf" => rf = Some(number()?),
                "ellps" | "datum" => {
                    named = Some(match value.to_ascii_uppercase().as_str() {
                        "WGS84" | "GRS80" => Self::wgs84(),
                        "NAD83" => Self::nad83(),
                        "WGS72" => Self::wgs72(),
                        "NAD27" | "CLRK66" => Self::nad27(),
                        _ => return Err(ProjectionError::UnknownDatum(value.to_string())),
                    })
                }
                _ => {}
            }
        }

        match (a, b, rf) {
            (Some(a), Some(b), _) => Self::from_axes(a, b).map(Some),
            (Some(a), None, Some(rf)) if rf > 0.0 => Self::from_axes(a, a * (1.0 - 1.0 / rf)).map(Some),
            (Some(a), None, _) => Self::from_axes(a, a).map(Some),
            _ => Ok(named),
        }
    }

    pub fn flattening(&self) -> f64 {
        (self.semi_major_axis - self.semi_minor_axis) / self.semi_major_axis
    }

    pub fn eccentricity_squared(&self) -> f64 {
        let a2 = self.semi_major_axis * self.semi_major_axis;
        let b2 = self.semi_minor_axis * self.semi_minor_axis;
        (a2 - b2) / a2
    }

    pub fn is_sphere(&self) -> bool {
        self.semi_major_axis == self.semi_minor_axis
    }

    pub fn proj_ellipsoid_params(&self) -> String {
        format!("+a={} +b={}", self.semi_major_axis, self.semi_minor_axis)
    }
}

impl Default for Datum {
    fn default() -> Self {
        Self::wgs84()
    }
}
