use std::path::{Path, PathBuf};

use glob::glob;
use pcd_parser::{
    csv_conv::{parse_utm_str, CsvConv, CsvFormat},
    path_extension,
    raster::RasterCloud,
    reader::georef_from_pc_files,
    Extension,
};
use projection_transform::{Datum, GeoReference, Projection, ProjectionParams};

use crate::{error::PipelineError, options::DemOptions};

/// Input files split into point clouds and orthoimage textures.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Inputs {
    pub clouds: Vec<PathBuf>,
    pub textures: Vec<PathBuf>,
}

impl Inputs {
    /// LAS/LAZ and CSV files, and TIFF files with at least three channels,
    /// are point clouds; other TIFF files are textures.
    pub fn classify(paths: Vec<PathBuf>) -> Result<Self, PipelineError> {
        let mut inputs = Inputs::default();
        for path in paths {
            match path_extension(&path) {
                Some(Extension::Tif) => {
                    let channels = RasterCloud::open(&path)?.num_channels();
                    if channels >= 3 {
                        inputs.clouds.push(path);
                    } else {
                        inputs.textures.push(path);
                    }
                }
                Some(_) => inputs.clouds.push(path),
                None => {
                    return Err(PipelineError::Input(format!(
                        "{}: unsupported file type",
                        path.display()
                    )))
                }
            }
        }
        if inputs.clouds.is_empty() {
            return Err(PipelineError::Input("no point clouds among the inputs".to_string()));
        }
        Ok(inputs)
    }

    /// Clouds read point by point, which need chipping.
    pub fn point_files(&self) -> Vec<&Path> {
        self.clouds
            .iter()
            .filter(|p| path_extension(p).is_some_and(|e| e.is_las_or_csv()))
            .map(PathBuf::as_path)
            .collect()
    }

    pub fn has_point_files(&self) -> bool {
        !self.point_files().is_empty()
    }

    /// An orthoimage needs one texture per cloud, each the size of its cloud.
    pub fn check_textures(&self) -> Result<(), PipelineError> {
        if self.has_point_files() {
            return Err(PipelineError::Input(
                "an orthoimage can only be made from point clouds stored as images".to_string(),
            ));
        }
        if self.textures.len() != self.clouds.len() {
            return Err(PipelineError::Input(format!(
                "an orthoimage needs one texture per point cloud, got {} textures for {} clouds",
                self.textures.len(),
                self.clouds.len()
            )));
        }
        for (cloud, texture) in self.clouds.iter().zip(&self.textures) {
            let (c, t) = (RasterCloud::open(cloud)?, RasterCloud::open(texture)?);
            if (c.width(), c.height()) != (t.width(), t.height()) {
                return Err(PipelineError::Input(format!(
                    "{} is {}x{} but {} is {}x{}",
                    texture.display(),
                    t.width(),
                    t.height(),
                    cloud.display(),
                    c.width(),
                    c.height()
                )));
            }
        }
        Ok(())
    }
}

pub fn expand_globs(patterns: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let entries =
                glob(pattern).map_err(|e| PipelineError::Config(format!("bad glob pattern {}: {}", pattern, e)))?;
            let before = paths.len();
            for entry in entries {
                match entry {
                    Ok(path) => paths.push(path),
                    Err(e) => log::warn!("skipping {}: {}", e.path().display(), e),
                }
            }
            if paths.len() == before {
                return Err(PipelineError::Input(format!("no files match {}", pattern)));
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }
    Ok(paths)
}

/// Output prefix derived from an input: the path without its extension and
/// without a trailing "-PC".
pub fn prefix_from_input(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let stem = stem.strip_suffix("-PC").unwrap_or(stem);
    path.with_file_name(stem).display().to_string()
}

/// Datum named on the command line, by name or by semi-axes.
pub fn user_datum(options: &DemOptions) -> Result<Option<Datum>, PipelineError> {
    if let Some(name) = options.datum_name() {
        return Ok(Some(Datum::from_name(name)?));
    }
    if options.semi_major_axis > 0.0 {
        return Ok(Some(Datum::from_axes(options.semi_major_axis, options.semi_minor_axis)?));
    }
    Ok(None)
}

/// Georeference of the values a CSV reader yields: none for cartesian
/// schemas, lon/lat on the datum for geodetic ones, and the schema's
/// projection for easting/northing data.
pub fn csv_point_georef(csv_conv: &CsvConv, datum: Option<&Datum>) -> Result<Option<GeoReference>, PipelineError> {
    if !csv_conv.is_configured() {
        return Ok(None);
    }
    match csv_conv.format {
        CsvFormat::Xyz => Ok(None),
        CsvFormat::EastingHeightNorthing => Ok(csv_conv.parse_georef(datum)?),
        _ => {
            let datum = match datum {
                Some(d) => d.clone(),
                None => csv_conv.parse_georef(None)?.map(|g| g.datum).unwrap_or_default(),
            };
            Ok(Some(GeoReference::new(datum, Projection::Geographic)))
        }
    }
}

/// Georeference of the output rasters. A target PROJ string, a UTM zone or a
/// named projection wins; otherwise the georeference of the input clouds,
/// then the projection of CSV data, then lon/lat. A user datum replaces the
/// datum in every case.
pub fn output_georef(
    options: &DemOptions,
    inputs: &Inputs,
    csv_conv: &CsvConv,
) -> Result<GeoReference, PipelineError> {
    let datum = user_datum(options)?;
    let input = georef_from_pc_files(&inputs.point_files())?;
    let csv = if csv_conv.is_configured() {
        csv_conv.parse_georef(datum.as_ref())?
    } else {
        None
    };

    let base_datum = datum
        .clone()
        .or_else(|| input.as_ref().map(|g| g.datum.clone()))
        .or_else(|| csv.as_ref().map(|g| g.datum.clone()))
        .unwrap_or_default();
    let params = ProjectionParams {
        center_longitude: options.proj_lon,
        center_latitude: options.proj_lat,
        scale: options.proj_scale,
        false_easting: options.false_easting,
        false_northing: options.false_northing,
    };

    let mut georef = if !options.t_srs.is_empty() {
        GeoReference::from_proj_string(&options.t_srs)?
    } else if let Some(utm) = &options.utm {
        let (zone, north) =
            parse_utm_str(utm).ok_or_else(|| PipelineError::Config(format!("cannot parse UTM zone {}", utm)))?;
        GeoReference::new(base_datum, Projection::utm(zone, north)?)
    } else if let Some(name) = &options.projection {
        GeoReference::new(base_datum, Projection::from_name(name, params)?)
    } else if let Some(georef) = input {
        georef
    } else if let Some(georef) = csv {
        georef
    } else {
        GeoReference::new(base_datum, Projection::Geographic)
    };

    if let Some(datum) = datum {
        georef.datum = datum;
    }
    log::info!(
        "output georeference: {} on {}",
        georef.projection.name(),
        georef.datum.name
    );
    Ok(georef)
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::BufWriter};

    use tiff::encoder::{colortype, TiffEncoder};

    use super::*;

    fn write_tiff(path: &Path, channels: usize) {
        let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path).unwrap())).unwrap();
        if channels == 3 {
            encoder
                .write_image::<colortype::RGB32Float>(2, 2, &[1.0f32; 12])
                .unwrap();
        } else {
            encoder
                .write_image::<colortype::Gray32Float>(2, 2, &[1.0f32; 4])
                .unwrap();
        }
    }

    #[test]
    fn clouds_and_textures() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = dir.path().join("run-PC.tif");
        let texture = dir.path().join("run-L.tif");
        write_tiff(&cloud, 3);
        write_tiff(&texture, 1);

        let inputs = Inputs::classify(vec![cloud.clone(), texture.clone()]).unwrap();
        assert_eq!(inputs.clouds, vec![cloud.clone()]);
        assert_eq!(inputs.textures, vec![texture.clone()]);
        assert!(!inputs.has_point_files());
        assert!(inputs.check_textures().is_ok());

        assert!(matches!(
            Inputs::classify(vec![texture]),
            Err(PipelineError::Input(_))
        ));
        assert!(matches!(
            Inputs::classify(vec![dir.path().join("notes.md")]),
            Err(PipelineError::Input(_))
        ));

        let with_csv = Inputs {
            clouds: vec![cloud, dir.path().join("pts.csv")],
            textures: Vec::new(),
        };
        assert_eq!(with_csv.point_files(), vec![dir.path().join("pts.csv").as_path()]);
        assert!(with_csv.check_textures().is_err());
    }

    #[test]
    fn globs_expand_to_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.csv", "b.csv", "c.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let pattern = dir.path().join("*.csv").display().to_string();
        let paths = expand_globs(&[pattern, "plain.las".to_string()]).unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[2], PathBuf::from("plain.las"));

        let nothing = dir.path().join("*.laz").display().to_string();
        assert!(matches!(expand_globs(&[nothing]), Err(PipelineError::Input(_))));
    }

    #[test]
    fn prefixes_drop_the_cloud_suffix() {
        assert_eq!(prefix_from_input(Path::new("out/run-PC.tif")), "out/run");
        assert_eq!(prefix_from_input(Path::new("pts.csv")), "pts");
    }

    #[test]
    fn georeference_selection() {
        let inputs = Inputs {
            clouds: vec![PathBuf::from("pts.csv")],
            textures: Vec::new(),
        };
        let utm_csv = CsvConv::from_format("utm:23N 1:easting 2:northing 3:height_above_datum", "").unwrap();

        let from_csv = output_georef(&DemOptions::default(), &inputs, &utm_csv).unwrap();
        assert_eq!(from_csv.projection, Projection::Utm { zone: 23, north: true });

        let moon = DemOptions {
            datum: Some("moon".to_string()),
            projection: Some("sinusoidal".to_string()),
            ..Default::default()
        };
        let georef = output_georef(&moon, &inputs, &CsvConv::new()).unwrap();
        assert_eq!(georef.datum, Datum::moon());
        assert!(matches!(georef.projection, Projection::Sinusoidal(_)));

        let spheroid = DemOptions {
            reference_spheroid: Some("mars".to_string()),
            ..Default::default()
        };
        assert_eq!(user_datum(&spheroid).unwrap(), Some(Datum::mars()));

        let lonlat = CsvConv::from_format("1:lon 2:lat 3:height_above_datum", "").unwrap();
        let point_georef = csv_point_georef(&lonlat, None).unwrap().unwrap();
        assert_eq!(point_georef.projection, Projection::Geographic);
        assert!(csv_point_georef(&CsvConv::from_format("1:x 2:y 3:z", "").unwrap(), None)
            .unwrap()
            .is_none());
    }
}
