use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead as _, BufReader},
    path::Path,
};

use pcd_core::pointcloud::point::Point;
use projection_transform::{
    cartesian::{cartesian_to_geodetic, geodetic_to_cartesian, normalize_longitude},
    Datum, GeoReference, Projection,
};

use crate::error::CsvError;

pub const DEFAULT_DELIMITERS: &str = ", \t;";

const NUM_POINT_VALUES: usize = 3;

/// Canonical representation a CSV schema converts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsvFormat {
    #[default]
    Xyz,
    LonLatRadiusMeters,
    LonLatRadiusKm,
    HeightLatLon,
    EastingHeightNorthing,
}

/// Values of one line, in file-column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvRecord {
    pub point_data: [f64; 3],
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvConv {
    pub csv_format_str: String,
    pub csv_proj4_str: String,
    /// UTM zone and hemisphere (true for north).
    pub utm_zone: Option<(u8, bool)>,
    pub col2name: BTreeMap<usize, String>,
    pub name2col: BTreeMap<String, usize>,
    /// Column index to position in the canonical triple.
    pub col2sort: BTreeMap<usize, usize>,
    pub num_targets: usize,
    pub format: CsvFormat,
    pub delimiters: String,
}

impl Default for CsvConv {
    fn default() -> Self {
        Self {
            csv_format_str: String::new(),
            csv_proj4_str: String::new(),
            utm_zone: None,
            col2name: BTreeMap::new(),
            name2col: BTreeMap::new(),
            col2sort: BTreeMap::new(),
            num_targets: 0,
            format: CsvFormat::default(),
            delimiters: DEFAULT_DELIMITERS.to_string(),
        }
    }
}

fn sorted_index_for_name(name: &str) -> Option<usize> {
    match name {
        "lon" | "x" | "easting" => Some(0),
        "lat" | "y" | "northing" => Some(1),
        "radius_m" | "radius_km" | "z" | "height_above_datum" => Some(2),
        "file" => Some(3),
        _ => None,
    }
}

/// Parses a UTM token such as "23N" or "5s".
pub fn parse_utm_str(utm: &str) -> Option<(u8, bool)> {
    let digits: String = utm.chars().take_while(|c| c.is_ascii_digit()).collect();
    let zone: u8 = digits.parse().ok()?;
    let north = match utm[digits.len()..].chars().next()? {
        'n' | 'N' => true,
        's' | 'S' => false,
        _ => return None,
    };
    Some((zone, north))
}

pub fn is_valid_csv_line(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('#')
}

/// Number of data lines of a CSV file, header included.
pub fn csv_file_size(path: &Path) -> Result<u64, CsvError> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        if is_valid_csv_line(&line?) {
            count += 1;
        }
    }
    Ok(count)
}

impl CsvConv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_format(csv_format_str: &str, csv_proj4_str: &str) -> Result<Self, CsvError> {
        let mut conv = Self::new();
        conv.parse_csv_format(csv_format_str, csv_proj4_str)?;
        Ok(conv)
    }

    pub fn with_delimiters(mut self, delimiters: &str) -> Self {
        self.delimiters = delimiters.to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.num_targets > 0
    }

    /// Parses strings like "1:x 2:y 3:z" or "utm:23N 1:easting 2:northing
    /// 3:height_above_datum". Column indices are 1-based. Resets the
    /// converter first; an empty string leaves it unconfigured.
    pub fn parse_csv_format(&mut self, csv_format_str: &str, csv_proj4_str: &str) -> Result<(), CsvError> {
        let fail = |reason: &str| CsvError::Format {
            format: csv_format_str.to_string(),
            reason: reason.to_string(),
        };

        if csv_proj4_str.contains("D_MOON") || csv_proj4_str.contains("D_MARS") {
            return Err(CsvError::Format {
                format: csv_proj4_str.to_string(),
                reason: "D_MOON and D_MARS are not PROJ names, specify the datum or the radii instead"
                    .to_string(),
            });
        }

        let delimiters = std::mem::take(&mut self.delimiters);
        *self = Self {
            delimiters,
            ..Self::default()
        };
        self.csv_format_str = csv_format_str.to_string();
        self.csv_proj4_str = csv_proj4_str.to_string();

        let local = csv_format_str.to_ascii_lowercase().replace([':', ','], " ");
        let mut tokens = local.split_whitespace().peekable();
        if tokens.peek().is_none() {
            return Ok(());
        }

        if tokens.peek() == Some(&"utm") {
            tokens.next();
            let utm = tokens.next().ok_or_else(|| fail("missing UTM zone"))?;
            self.utm_zone = Some(parse_utm_str(utm).ok_or_else(|| fail("could not parse UTM zone"))?);
        }

        while let Some(col) = tokens.next() {
            let name = tokens.next().ok_or_else(|| fail("expecting column:name pairs"))?;
            let col: usize = col.parse().map_err(|_| fail("illegal column index"))?;
            if col == 0 || self.col2name.contains_key(&(col - 1)) {
                return Err(fail("illegal column index"));
            }
            if sorted_index_for_name(name).is_none() {
                return Err(fail(&format!("unsupported column name: {}", name)));
            }
            if self.name2col.contains_key(name) {
                return Err(fail(&format!("repeated column name: {}", name)));
            }
            self.name2col.insert(name.to_string(), col - 1);
            self.col2name.insert(col - 1, name.to_string());
        }

        self.num_targets = self.name2col.len();
        if !(NUM_POINT_VALUES..=NUM_POINT_VALUES + 1).contains(&self.num_targets) {
            return Err(fail("invalid number of columns"));
        }

        let mut sorted_names = vec![""; NUM_POINT_VALUES + 1];
        for (name, &col) in &self.name2col {
            let index = sorted_index_for_name(name).ok_or_else(|| fail(name.as_str()))?;
            if !sorted_names[index].is_empty() {
                return Err(fail("conflicting column names"));
            }
            sorted_names[index] = name.as_str();
            if index < NUM_POINT_VALUES {
                self.col2sort.insert(col, index);
            }
        }
        if self.num_targets == NUM_POINT_VALUES + 1 && sorted_names[3] != "file" {
            return Err(fail("the fourth column must be a file name"));
        }

        self.format = match sorted_names[..NUM_POINT_VALUES] {
            ["x", "y", "z"] => CsvFormat::Xyz,
            ["lon", "lat", "radius_m"] => CsvFormat::LonLatRadiusMeters,
            ["lon", "lat", "radius_km"] => CsvFormat::LonLatRadiusKm,
            ["lon", "lat", "height_above_datum"] => CsvFormat::HeightLatLon,
            ["easting", "northing", "height_above_datum"] => CsvFormat::EastingHeightNorthing,
            _ => return Err(fail("cannot understand the combination of columns")),
        };
        Ok(())
    }

    /// Georeference needed to interpret projected values. `None` when the
    /// schema names neither a UTM zone nor a PROJ string.
    pub fn parse_georef(&self, datum: Option<&Datum>) -> Result<Option<GeoReference>, CsvError> {
        if let Some((zone, north)) = self.utm_zone {
            let datum = datum.cloned().unwrap_or_else(Datum::wgs84);
            return Ok(Some(GeoReference::new(datum, Projection::utm(zone, north)?)));
        }
        if !self.csv_proj4_str.is_empty() {
            let mut georef = GeoReference::from_proj_string(&self.csv_proj4_str)?;
            if let (Some(datum), Ok(None)) = (datum, Datum::from_proj_string(&self.csv_proj4_str)) {
                georef.datum = datum.clone();
            }
            return Ok(Some(georef));
        }
        if self.format == CsvFormat::EastingHeightNorthing {
            return Err(CsvError::MissingGeoreference);
        }
        Ok(None)
    }

    pub fn write_header_string(&self, delimiter: &str) -> String {
        self.col2name
            .values()
            .map(|name| format!("{}{}", name, delimiter))
            .collect()
    }

    /// Parses one line. The returned flag is false when a token does not
    /// parse or columns are missing; that is tolerated on the first line
    /// only, which is taken to be a header. `is_first_line` is cleared.
    pub fn parse_csv_line(&self, is_first_line: &mut bool, line: &str) -> Result<(CsvRecord, bool), CsvError> {
        let mut record = CsvRecord::default();
        let mut success = true;
        let mut num_floats_read = 0;
        let mut num_values_read = 0;

        let tokens = line
            .split(|c| self.delimiters.contains(c))
            .filter(|t| !t.is_empty());
        for (col, token) in tokens.enumerate() {
            if num_values_read >= self.num_targets {
                break;
            }
            let Some(name) = self.col2name.get(&col) else {
                continue;
            };
            if name == "file" {
                record.file = Some(token.to_string());
            } else {
                match token.parse::<f64>() {
                    Ok(value) => {
                        record.point_data[num_floats_read] = value;
                        num_floats_read += 1;
                    }
                    Err(_) => {
                        success = false;
                        break;
                    }
                }
            }
            num_values_read += 1;
        }

        if num_values_read != self.num_targets {
            success = false;
        }
        if !success && !*is_first_line {
            return Err(CsvError::Parse(line.to_string()));
        }

        *is_first_line = false;
        Ok((record, success))
    }

    /// Parses every line of a file, skipping a header and comment lines.
    pub fn parse_entire_file(&self, path: &Path) -> Result<Vec<CsvRecord>, CsvError> {
        let reader = BufReader::new(File::open(path)?);
        let mut first_line = true;
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !is_valid_csv_line(&line) {
                continue;
            }
            let (record, success) = self.parse_csv_line(&mut first_line, &line)?;
            if success {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Reorders the coordinate values of a record into canonical order.
    pub fn sort_parsed_vector3(&self, csv: &CsvRecord) -> Point {
        let mut ordered = Point::zeros();
        for (count, &index) in self.col2sort.values().enumerate() {
            ordered[index] = csv.point_data[count];
        }
        ordered
    }

    /// Inverse of `sort_parsed_vector3`.
    pub fn unsort_vector3(&self, canonical: &Point) -> Point {
        let mut unsorted = Point::zeros();
        for (count, &index) in self.col2sort.values().enumerate() {
            unsorted[count] = canonical[index];
        }
        unsorted
    }

    fn require<'a>(&self, georef: Option<&'a GeoReference>) -> Result<&'a GeoReference, CsvError> {
        georef.ok_or(CsvError::MissingGeoreference)
    }

    fn radius_to_cartesian(&self, ordered: &Point, datum: &Datum) -> Point {
        let mut radius = ordered.z;
        if self.format == CsvFormat::LonLatRadiusKm {
            radius *= 1000.0;
        }
        let surface = geodetic_to_cartesian(datum, &Point::new(ordered.x, ordered.y, 0.0));
        surface.normalize() * radius
    }

    fn projected_to_geodetic(&self, ordered: &Point, georef: &GeoReference) -> Result<Point, CsvError> {
        if !georef.is_projected() {
            return Err(CsvError::MissingGeoreference);
        }
        let (lon, lat) = georef.point_to_lonlat(ordered.x, ordered.y)?;
        Ok(Point::new(lon, lat, ordered.z))
    }

    pub fn csv_to_cartesian(&self, csv: &CsvRecord, georef: Option<&GeoReference>) -> Result<Point, CsvError> {
        let ordered = self.sort_parsed_vector3(csv);
        match self.format {
            CsvFormat::Xyz => Ok(ordered),
            CsvFormat::EastingHeightNorthing => {
                let georef = self.require(georef)?;
                let llh = self.projected_to_geodetic(&ordered, georef)?;
                Ok(geodetic_to_cartesian(&georef.datum, &llh))
            }
            CsvFormat::HeightLatLon => Ok(geodetic_to_cartesian(&self.require(georef)?.datum, &ordered)),
            CsvFormat::LonLatRadiusMeters | CsvFormat::LonLatRadiusKm => {
                Ok(self.radius_to_cartesian(&ordered, &self.require(georef)?.datum))
            }
        }
    }

    pub fn csv_to_geodetic(&self, csv: &CsvRecord, georef: Option<&GeoReference>) -> Result<Point, CsvError> {
        let ordered = self.sort_parsed_vector3(csv);
        let georef = self.require(georef)?;
        match self.format {
            CsvFormat::Xyz => Ok(cartesian_to_geodetic(&georef.datum, &ordered)),
            CsvFormat::EastingHeightNorthing => self.projected_to_geodetic(&ordered, georef),
            CsvFormat::HeightLatLon => Ok(ordered),
            CsvFormat::LonLatRadiusMeters | CsvFormat::LonLatRadiusKm => Ok(cartesian_to_geodetic(
                &georef.datum,
                &self.radius_to_cartesian(&ordered, &georef.datum),
            )),
        }
    }

    pub fn csv_to_lonlat(&self, csv: &CsvRecord, georef: Option<&GeoReference>) -> Result<(f64, f64), CsvError> {
        let ordered = self.sort_parsed_vector3(csv);
        match self.format {
            CsvFormat::Xyz => {
                let llh = cartesian_to_geodetic(&self.require(georef)?.datum, &ordered);
                Ok((llh.x, llh.y))
            }
            CsvFormat::EastingHeightNorthing => {
                let llh = self.projected_to_geodetic(&ordered, self.require(georef)?)?;
                Ok((llh.x, llh.y))
            }
            _ => Ok((ordered.x, ordered.y)),
        }
    }

    /// Like `csv_to_cartesian`, but with `return_point_height` projected and
    /// geodetic schemas stay as (x, y, height) in their own coordinates, which
    /// groups spatially close points better when chipping.
    pub fn csv_to_cartesian_or_point_height(
        &self,
        csv: &CsvRecord,
        georef: Option<&GeoReference>,
        return_point_height: bool,
    ) -> Result<Point, CsvError> {
        if !return_point_height {
            return self.csv_to_cartesian(csv, georef);
        }
        let ordered = self.sort_parsed_vector3(csv);
        match self.format {
            CsvFormat::Xyz | CsvFormat::EastingHeightNorthing | CsvFormat::HeightLatLon => Ok(ordered),
            CsvFormat::LonLatRadiusMeters | CsvFormat::LonLatRadiusKm => {
                let datum = &self.require(georef)?.datum;
                Ok(cartesian_to_geodetic(datum, &self.radius_to_cartesian(&ordered, datum)))
            }
        }
    }

    /// Converts a cartesian point back to this schema, in file-column order.
    /// Longitudes are moved to the branch around `mean_longitude`.
    pub fn cartesian_to_csv(
        &self,
        xyz: &Point,
        georef: Option<&GeoReference>,
        mean_longitude: f64,
    ) -> Result<Point, CsvError> {
        let canonical = if self.format == CsvFormat::Xyz {
            *xyz
        } else {
            let georef = self.require(georef)?;
            let mut llh = cartesian_to_geodetic(&georef.datum, xyz);
            llh.x = normalize_longitude(llh.x, mean_longitude);
            match self.format {
                CsvFormat::EastingHeightNorthing => {
                    if !georef.is_projected() {
                        return Err(CsvError::MissingGeoreference);
                    }
                    let (e, n) = georef.lonlat_to_point(llh.x, llh.y)?;
                    Point::new(e, n, llh.z)
                }
                CsvFormat::HeightLatLon => llh,
                CsvFormat::LonLatRadiusKm => Point::new(llh.x, llh.y, xyz.norm() / 1000.0),
                _ => Point::new(llh.x, llh.y, xyz.norm()),
            }
        };
        Ok(self.unsort_vector3(&canonical))
    }
}
