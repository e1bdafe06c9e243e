use std::path::Path;

use clap::Args;
use pcd_parser::csv_conv::parse_utm_str;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const DEFAULT_ROUNDING_ERROR: f64 = 1.0 / 1024.0;
pub const DEFAULT_OUTLIER_PERCENTILE: f64 = 75.0;
pub const DEFAULT_OUTLIER_FACTOR: f64 = 3.0;

fn default_nodata() -> f64 {
    -(f32::MAX as f64)
}

/// Options of a DEM run. Read from the command line, or from a JSON file
/// with the same field names.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemOptions {
    /// Point clouds (multi-channel TIFF, LAS/LAZ, CSV) and orthoimages
    #[arg(value_name = "FILE", num_args = 0..)]
    pub inputs: Vec<String>,

    /// Output file prefix; defaults to the first input without its extension
    #[arg(short, long, default_value = "")]
    pub output_prefix: String,

    /// Output spacings; 0 estimates one from the input
    #[arg(short = 's', long, num_args = 1..)]
    pub dem_spacing: Vec<f64>,

    #[arg(long, default_value_t = default_nodata(), allow_negative_numbers = true)]
    pub nodata_value: f64,

    /// Target PROJ string
    #[arg(long, default_value = "")]
    pub t_srs: String,

    /// Output projection by name, e.g. sinusoidal or stereographic
    #[arg(long)]
    pub projection: Option<String>,

    /// UTM zone such as 23N
    #[arg(long)]
    pub utm: Option<String>,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub proj_lon: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub proj_lat: f64,

    #[arg(long, default_value_t = 1.0)]
    pub proj_scale: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub false_easting: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub false_northing: f64,

    /// Datum name: WGS_1984, NAD83, WGS72, NAD27, D_MOON, D_MARS or MOLA
    #[arg(long)]
    pub datum: Option<String>,

    /// Same as --datum, for heights above a reference spheroid
    #[arg(short = 'r', long)]
    pub reference_spheroid: Option<String>,

    #[arg(long, default_value_t = 0.0)]
    pub semi_major_axis: f64,

    #[arg(long, default_value_t = 0.0)]
    pub semi_minor_axis: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub phi_rotation: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub omega_rotation: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub kappa_rotation: f64,

    /// Axes the rotation angles apply to, in order
    #[arg(long, default_value = "xyz")]
    pub rotation_order: String,

    /// Longitude offset, in degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub x_offset: f64,

    /// Latitude offset, in degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub y_offset: f64,

    /// Height offset
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub z_offset: f64,

    #[arg(long, default_value_t = DEFAULT_OUTLIER_PERCENTILE)]
    pub outlier_percentile: f64,

    #[arg(long, default_value_t = DEFAULT_OUTLIER_FACTOR)]
    pub outlier_factor: f64,

    /// Fixed triangulation error threshold; overrides the percentile estimate
    #[arg(long, default_value_t = 0.0)]
    pub max_valid_triangulation_error: f64,

    #[arg(long, default_value_t = 0)]
    pub median_filter_window: usize,

    #[arg(long, default_value_t = 0.0)]
    pub median_filter_threshold: f64,

    #[arg(long, default_value_t = 0)]
    pub erode_length: usize,

    #[arg(long, default_value_t = 0)]
    pub dem_hole_fill_len: usize,

    #[arg(long, default_value_t = 0)]
    pub orthoimage_hole_fill_len: usize,

    /// Search radius as a multiple of the spacing; 0 uses the spacing
    #[arg(long, default_value_t = 0.0)]
    pub search_radius_factor: f64,

    /// Oversampling factor of the anti-aliasing pass
    #[arg(long, default_value_t = 1)]
    pub fsaa: usize,

    /// Output extent: xmin ymin xmax ymax
    #[arg(long, num_args = 4, allow_negative_numbers = true)]
    pub t_projwin: Option<Vec<f64>>,

    /// CSV column layout, e.g. "1:lon 2:lat 3:height_above_datum"
    #[arg(long, default_value = "")]
    pub csv_format: String,

    /// PROJ string of projected CSV data
    #[arg(long, default_value = "")]
    pub csv_proj4: String,

    #[arg(long, default_value_t = DEFAULT_ROUNDING_ERROR)]
    pub rounding_error: f64,

    /// Also write a DEM scaled to bytes
    #[arg(short, long)]
    pub normalized: bool,

    /// Also write an orthoimage from the texture inputs
    #[arg(long)]
    pub orthoimage: bool,

    /// Also write the triangulation error raster
    #[arg(long)]
    pub errorimage: bool,

    #[arg(long)]
    pub no_dem: bool,

    /// Write the orthoimage as RGBA with no-data pixels transparent
    #[arg(long)]
    pub use_alpha: bool,

    /// Grid triangles of the surface instead of points
    #[arg(long)]
    pub use_surface_sampling: bool,

    /// Worker threads; 0 uses every core
    #[arg(long, default_value_t = 0)]
    pub threads: usize,
}

impl Default for DemOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output_prefix: String::new(),
            dem_spacing: Vec::new(),
            nodata_value: default_nodata(),
            t_srs: String::new(),
            projection: None,
            utm: None,
            proj_lon: 0.0,
            proj_lat: 0.0,
            proj_scale: 1.0,
            false_easting: 0.0,
            false_northing: 0.0,
            datum: None,
            reference_spheroid: None,
            semi_major_axis: 0.0,
            semi_minor_axis: 0.0,
            phi_rotation: 0.0,
            omega_rotation: 0.0,
            kappa_rotation: 0.0,
            rotation_order: "xyz".to_string(),
            x_offset: 0.0,
            y_offset: 0.0,
            z_offset: 0.0,
            outlier_percentile: DEFAULT_OUTLIER_PERCENTILE,
            outlier_factor: DEFAULT_OUTLIER_FACTOR,
            max_valid_triangulation_error: 0.0,
            median_filter_window: 0,
            median_filter_threshold: 0.0,
            erode_length: 0,
            dem_hole_fill_len: 0,
            orthoimage_hole_fill_len: 0,
            search_radius_factor: 0.0,
            fsaa: 1,
            t_projwin: None,
            csv_format: String::new(),
            csv_proj4: String::new(),
            rounding_error: DEFAULT_ROUNDING_ERROR,
            normalized: false,
            orthoimage: false,
            errorimage: false,
            no_dem: false,
            use_alpha: false,
            use_surface_sampling: false,
            threads: 0,
        }
    }
}

impl DemOptions {
    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Spacings to produce, in order; one automatic spacing when none is given.
    pub fn spacings(&self) -> Vec<f64> {
        if self.dem_spacing.is_empty() {
            vec![0.0]
        } else {
            self.dem_spacing.clone()
        }
    }

    /// Datum named by --datum or --reference-spheroid.
    pub fn datum_name(&self) -> Option<&str> {
        self.datum.as_deref().or(self.reference_spheroid.as_deref())
    }

    pub fn has_rotation(&self) -> bool {
        self.phi_rotation != 0.0 || self.omega_rotation != 0.0 || self.kappa_rotation != 0.0
    }

    /// Checks option values on their own, before any input is opened.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |message: String| Err(PipelineError::Config(message));

        if self.inputs.is_empty() {
            return fail("no input files".to_string());
        }
        if self.use_surface_sampling {
            return fail("surface sampling is not supported, grid the points instead".to_string());
        }
        if let Some(s) = self.dem_spacing.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return fail(format!("the DEM spacing must be non-negative, got {}", s));
        }
        if !(self.outlier_percentile > 0.0 && self.outlier_percentile <= 100.0) {
            return fail(format!(
                "the outlier percentile must be in (0, 100], got {}",
                self.outlier_percentile
            ));
        }
        if self.outlier_factor <= 0.0 {
            return fail(format!("the outlier factor must be positive, got {}", self.outlier_factor));
        }
        if self.max_valid_triangulation_error < 0.0 {
            return fail(format!(
                "the maximum triangulation error must be non-negative, got {}",
                self.max_valid_triangulation_error
            ));
        }
        if self.orthoimage_hole_fill_len > 0 && !self.orthoimage {
            return fail("the orthoimage hole fill length needs --orthoimage".to_string());
        }
        if self.fsaa == 0 {
            return fail("the anti-aliasing factor must be at least 1".to_string());
        }
        if self.search_radius_factor < 0.0 {
            return fail(format!(
                "the search radius factor must be non-negative, got {}",
                self.search_radius_factor
            ));
        }
        if self.rounding_error < 0.0 {
            return fail(format!("the rounding error must be non-negative, got {}", self.rounding_error));
        }
        if self.median_filter_window > 0 && self.median_filter_threshold <= 0.0 {
            return fail("the median filter needs a positive threshold".to_string());
        }
        if self.datum.is_some() && self.reference_spheroid.is_some() {
            return fail("both --datum and --reference-spheroid were given".to_string());
        }
        if (self.semi_major_axis > 0.0) != (self.semi_minor_axis > 0.0)
            || self.semi_major_axis < 0.0
            || self.semi_minor_axis < 0.0
        {
            return fail("both semi-axes must be set to positive values".to_string());
        }
        if let Some(win) = &self.t_projwin {
            if win.len() != 4 {
                return fail(format!("the projwin needs 4 values, got {}", win.len()));
            }
            if win[0] == win[2] || win[1] == win[3] {
                return fail(format!("the projwin {:?} is empty", win));
            }
        }
        if let Some(utm) = &self.utm {
            if !matches!(parse_utm_str(utm), Some((1..=60, _))) {
                return fail(format!("cannot parse UTM zone {}", utm));
            }
        }
        if self.no_dem && !self.normalized && !self.orthoimage && !self.errorimage {
            return fail("nothing to write with --no-dem".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> DemOptions {
        DemOptions {
            inputs: vec!["run-PC.tif".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(options().validate().is_ok());
        assert_eq!(options().spacings(), vec![0.0]);
        assert_eq!(options().nodata_value, -(f32::MAX as f64));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            DemOptions {
                outlier_percentile: 0.0,
                ..options()
            },
            DemOptions {
                outlier_factor: -1.0,
                ..options()
            },
            DemOptions {
                orthoimage_hole_fill_len: 10,
                ..options()
            },
            DemOptions {
                dem_spacing: vec![1.0, -2.0],
                ..options()
            },
            DemOptions {
                use_surface_sampling: true,
                ..options()
            },
            DemOptions {
                semi_major_axis: 1000.0,
                ..options()
            },
            DemOptions {
                t_projwin: Some(vec![0.0, 0.0, 0.0, 1.0]),
                ..options()
            },
            DemOptions {
                inputs: Vec::new(),
                ..options()
            },
            DemOptions {
                datum: Some("WGS84".to_string()),
                reference_spheroid: Some("moon".to_string()),
                ..options()
            },
            DemOptions {
                utm: Some("61N".to_string()),
                ..options()
            },
            DemOptions {
                utm: Some("north".to_string()),
                ..options()
            },
        ];
        for case in cases {
            assert!(matches!(case.validate(), Err(PipelineError::Config(_))), "{:?}", case);
        }

        let with_ortho = DemOptions {
            orthoimage: true,
            orthoimage_hole_fill_len: 10,
            ..options()
        };
        assert!(with_ortho.validate().is_ok());

        let with_zone = DemOptions {
            utm: Some("23S".to_string()),
            ..options()
        };
        assert!(with_zone.validate().is_ok());
    }

    #[test]
    fn json_fields_default_individually() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"inputs": ["a.csv"], "dem_spacing": [2.0], "csv_format": "1:x 2:y 3:z"}"#).unwrap();
        let options = DemOptions::from_json_file(&path).unwrap();
        assert_eq!(options.inputs, vec!["a.csv".to_string()]);
        assert_eq!(options.spacings(), vec![2.0]);
        assert_eq!(options.rounding_error, DEFAULT_ROUNDING_ERROR);
        assert_eq!(options.rotation_order, "xyz");

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(DemOptions::from_json_file(&path), Err(PipelineError::Config(_))));
    }
}
