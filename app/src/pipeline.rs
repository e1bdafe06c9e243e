use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use pcd_chipper::{
    chip_point_source, ChipLayout, CloudSource, CompositeCloud, TileStore, DEFAULT_BLOCK_SIZE, DEFAULT_TILE_LEN,
};
use pcd_core::pointcloud::{
    block::PixelRect,
    decimation::decimator::{PointCloudDecimator, StrideDecimator},
    image::PointImage,
    point::is_valid_cartesian,
};
use pcd_exporter::{write_raster, RasterSink, SampleFormat};
use pcd_parser::{
    csv_conv::CsvConv,
    raster::RasterCloud,
    reader::{open_point_reader, PointReader},
};
use pcd_rasterizer::{
    estimate_max_error, fill_holes,
    median::MedianFilter,
    postprocess::{antialias, erode, normalize, round_valid, rounding_step},
    GridValue, OrthoRasterizer, OutlierPolicy, ProjWin, Raster, RasterizeError, RasterizerOptions,
};
use pcd_transformer::{
    transform::{
        rotation::{euler_to_rotation_matrix, RotationTransform},
        Transform,
    },
    DemTransformBuilder, TransformBuilder, TransformedCloud,
};
use projection_transform::{cartesian::longitude_branch_center, Datum, GeoReference};
use rayon::prelude::*;

use crate::{
    error::PipelineError,
    inputs::{csv_point_georef, expand_globs, output_georef, prefix_from_input, user_datum, Inputs},
    options::DemOptions,
};

type DemRasterizer = OrthoRasterizer<TransformedCloud<CompositeCloud>>;

/// What a run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub outputs: Vec<PathBuf>,
    /// Output spacing of each written set, in georeference units.
    pub spacings: Vec<f64>,
    pub num_points: usize,
    pub max_error: Option<f64>,
}

/// Opens every cloud, chipping the LAS and CSV ones, and places them side
/// by side in one image.
fn load_clouds(inputs: &Inputs, csv_conv: &CsvConv, datum: Option<&Datum>) -> Result<CompositeCloud, PipelineError> {
    enum Opened {
        Raster(RasterCloud),
        Points(Box<dyn PointReader>),
    }

    let csv_georef = csv_point_georef(csv_conv, datum)?;
    let mut opened = Vec::with_capacity(inputs.clouds.len());
    for path in &inputs.clouds {
        if inputs.point_files().contains(&path.as_path()) {
            opened.push(Opened::Points(open_point_reader(path, csv_conv, csv_georef.as_ref())?));
        } else {
            opened.push(Opened::Raster(RasterCloud::open(path)?));
        }
    }

    let raster_rows = opened
        .iter()
        .filter_map(|o| match o {
            Opened::Raster(r) => Some(r.height()),
            _ => None,
        })
        .max();
    let num_rows = raster_rows.unwrap_or_else(|| {
        let max_points = opened
            .iter()
            .filter_map(|o| match o {
                Opened::Points(p) => Some(p.num_points()),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        (max_points as f64).sqrt().ceil() as usize
    });

    let mut sources = Vec::with_capacity(opened.len());
    for (path, cloud) in inputs.clouds.iter().zip(opened) {
        match cloud {
            Opened::Raster(raster) => sources.push(CloudSource::Raster(raster)),
            Opened::Points(reader) => {
                let start = Instant::now();
                let layout = ChipLayout::new(reader.num_points(), num_rows, DEFAULT_TILE_LEN, DEFAULT_BLOCK_SIZE)?;
                let chipped = chip_point_source(reader, layout, TileStore::new()?)?;
                log::info!(
                    "chipped {} into a {}x{} image in {:?}",
                    path.display(),
                    layout.cols,
                    layout.rows,
                    start.elapsed()
                );
                sources.push(CloudSource::Chipped(chipped));
            }
        }
    }
    Ok(CompositeCloud::new(sources)?)
}

/// Longitude the output is centered on, from the mean X of a coarse
/// subsample of the (rotated) cartesian cloud.
fn longitude_center(cloud: &CompositeCloud, rotation: Option<&dyn Transform>) -> Result<f64, PipelineError> {
    let diagonal = (cloud.width() as f64).hypot(cloud.height() as f64);
    let decimator = StrideDecimator::new((diagonal / 32.0) as usize);

    let (sum, count) = PixelRect::tiles(cloud.width(), cloud.height(), 256, 256)
        .into_par_iter()
        .filter(|rect| decimator.samples_in(rect))
        .map(|rect| -> Result<(f64, usize), PipelineError> {
            let mut block = cloud.read_block(rect)?;
            if let Some(rotation) = rotation {
                block = rotation.transform(block)?;
            }
            let points: Vec<_> = block.points().collect();
            let mut sum = (0.0, 0);
            for index in decimator.decimate(&block) {
                if is_valid_cartesian(&points[index]) {
                    sum.0 += points[index].x;
                    sum.1 += 1;
                }
            }
            Ok(sum)
        })
        .try_reduce(|| (0.0, 0), |a, b| Ok((a.0 + b.0, a.1 + b.1)))?;

    if count == 0 {
        log::warn!("no valid points found while sampling the cloud");
        return Ok(0.0);
    }
    Ok(longitude_branch_center(sum / count as f64))
}

fn outlier_policy(options: &DemOptions, channels: usize) -> OutlierPolicy {
    if options.max_valid_triangulation_error > 0.0 {
        OutlierPolicy::Fixed {
            max_error: options.max_valid_triangulation_error,
        }
    } else if channels == 4 || channels == 6 {
        OutlierPolicy::Percentile {
            percentile: options.outlier_percentile,
            factor: options.outlier_factor,
        }
    } else {
        OutlierPolicy::None
    }
}

/// Resolves the outlier policy to a threshold, estimating it if needed.
fn outlier_threshold(policy: OutlierPolicy, cloud: &CompositeCloud) -> Result<Option<f64>, PipelineError> {
    match policy {
        OutlierPolicy::None => Ok(None),
        OutlierPolicy::Fixed { max_error } => {
            log::info!("using a maximum triangulation error of {}", max_error);
            Ok(Some(max_error))
        }
        OutlierPolicy::Percentile { percentile, factor } => match estimate_max_error(cloud, percentile, factor) {
            Ok(value) => Ok(Some(value)),
            Err(RasterizeError::NoValidSamples) => {
                log::warn!("no valid triangulation errors found, outliers are kept");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        },
    }
}

fn write(
    sink: &mut dyn RasterSink,
    path: String,
    raster: &Raster,
    format: SampleFormat,
    georef: &GeoReference,
    outputs: &mut Vec<PathBuf>,
) -> Result<(), PipelineError> {
    let path = PathBuf::from(path);
    write_raster(sink, &path, raster, format, Some(georef))?;
    outputs.push(path);
    Ok(())
}

/// Grids and writes every requested output at one spacing.
fn rasterize_spacing(
    options: &DemOptions,
    rasterizer: &mut DemRasterizer,
    textures: Option<&CompositeCloud>,
    georef: &mut GeoReference,
    spacing: f64,
    prefix: &str,
    sink: &mut dyn RasterSink,
) -> Result<(Vec<PathBuf>, f64), PipelineError> {
    let start = Instant::now();
    let fsaa = options.fsaa;
    let spacing = if spacing > 0.0 { spacing } else { rasterizer.default_spacing() };
    rasterizer.initialize_spacing(spacing / fsaa as f64)?;

    let rasterizer = &*rasterizer;
    let (width, height) = (rasterizer.width().div_ceil(fsaa), rasterizer.height().div_ceil(fsaa));
    let mut transform = rasterizer.geo_transform();
    transform.pixel_width *= fsaa as f64;
    transform.pixel_height *= fsaa as f64;
    georef.set_transform(transform);

    let nodata = options.nodata_value as f32;
    let step = rounding_step(
        options.rounding_error,
        georef.datum.semi_major_axis,
        georef.datum.semi_minor_axis,
    );
    let downsample = |raster: Raster| {
        if fsaa > 1 {
            antialias(&raster, fsaa, width, height)
        } else {
            raster
        }
    };
    let grid = |value: GridValue| -> Result<Raster, PipelineError> { Ok(downsample(rasterizer.grid(value, nodata)?)) };

    let mut outputs = Vec::new();
    if !options.no_dem || options.normalized {
        let mut dem = grid(GridValue::Height)?;
        erode(&mut dem, options.erode_length);
        round_valid(&mut dem, step);
        fill_holes(&mut dem, options.dem_hole_fill_len);
        if !options.no_dem {
            write(sink, format!("{}-DEM.tif", prefix), &dem, SampleFormat::Float32, georef, &mut outputs)?;
        }
        if options.normalized {
            let bbox = rasterizer.bbox();
            let mut normalized = Raster::new(dem.width, dem.height, 1, 0.0);
            normalized.data = normalize(&dem, bbox.min[2], bbox.max[2]).into_iter().map(f32::from).collect();
            let path = format!("{}-DEM-normalized.tif", prefix);
            write(sink, path, &normalized, SampleFormat::UInt8, georef, &mut outputs)?;
        }
    }

    if options.errorimage {
        let error = match rasterizer.cloud().num_channels() {
            4 => Some(grid(GridValue::Channel(3))?),
            6 => {
                let bands = (3..6)
                    .map(|channel| grid(GridValue::Channel(channel)))
                    .collect::<Result<Vec<_>, _>>()?;
                Raster::combine(&bands, true)
            }
            channels => {
                log::warn!(
                    "the point cloud has {} channels and no triangulation error, skipping the error image",
                    channels
                );
                None
            }
        };
        if let Some(mut error) = error {
            erode(&mut error, options.erode_length);
            round_valid(&mut error, step);
            let path = format!("{}-IntersectionErr.tif", prefix);
            write(sink, path, &error, SampleFormat::Float32, georef, &mut outputs)?;
        }
    }

    if let Some(textures) = textures {
        let mut drg = downsample(rasterizer.grid_texture(textures, nodata)?);
        erode(&mut drg, options.erode_length);
        fill_holes(&mut drg, options.orthoimage_hole_fill_len);
        if options.use_alpha {
            drg = drg.with_alpha().unwrap_or(drg);
        }
        write(sink, format!("{}-DRG.tif", prefix), &drg, SampleFormat::Float32, georef, &mut outputs)?;
    }

    log::info!("finished spacing {} in {:?}", spacing, start.elapsed());
    Ok((outputs, spacing))
}

/// Runs the whole conversion, writing rasters through `sink`.
pub fn run(options: &DemOptions, sink: &mut dyn RasterSink) -> Result<PipelineReport, PipelineError> {
    let start = Instant::now();
    options.validate()?;
    let datum = user_datum(options)?;
    let csv_conv = CsvConv::from_format(&options.csv_format, &options.csv_proj4)?;

    let inputs = Inputs::classify(expand_globs(&options.inputs)?)?;
    if inputs.has_point_files() {
        if options.spacings().iter().any(|s| *s == 0.0) {
            return Err(PipelineError::Config(
                "LAS and CSV inputs need an explicit --dem-spacing".to_string(),
            ));
        }
        if options.median_filter_window > 0 {
            return Err(PipelineError::Config(
                "the median filter needs point clouds stored as images".to_string(),
            ));
        }
    }
    if options.orthoimage {
        inputs.check_textures()?;
    }

    let prefix = if options.output_prefix.is_empty() {
        prefix_from_input(&inputs.clouds[0])
    } else {
        options.output_prefix.clone()
    };
    if let Some(parent) = Path::new(&prefix).parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut georef = output_georef(options, &inputs, &csv_conv)?;

    log::info!("start loading point clouds...");
    let start_local = Instant::now();
    let cloud = load_clouds(&inputs, &csv_conv, datum.as_ref())?;
    log::info!(
        "finish loading a {}x{} cloud with {} channels in {:?}",
        cloud.width(),
        cloud.height(),
        cloud.num_channels(),
        start_local.elapsed()
    );

    let rotation = if options.has_rotation() {
        Some(euler_to_rotation_matrix(
            options.phi_rotation,
            options.omega_rotation,
            options.kappa_rotation,
            &options.rotation_order,
        )?)
    } else {
        None
    };
    let center = match rotation {
        Some(matrix) => longitude_center(&cloud, Some(&RotationTransform::new(matrix)))?,
        None => longitude_center(&cloud, None)?,
    };
    let max_error = outlier_threshold(outlier_policy(options, cloud.num_channels()), &cloud)?;

    let mut builder = DemTransformBuilder::new(georef.clone())
        .center_longitude(center)
        .offset(options.x_offset, options.y_offset, options.z_offset);
    if let Some(matrix) = rotation {
        builder = builder.rotation(matrix);
    }
    let transformed = TransformedCloud::new(cloud, builder.build());

    let textures = if options.orthoimage {
        let sources = inputs
            .textures
            .iter()
            .map(|p| RasterCloud::open(p).map(CloudSource::Raster))
            .collect::<Result<Vec<_>, _>>()?;
        Some(CompositeCloud::new(sources)?)
    } else {
        None
    };

    let raster_options = RasterizerOptions {
        search_radius_factor: options.search_radius_factor,
        projwin: options
            .t_projwin
            .as_ref()
            .map(|w| ProjWin::new(w[0], w[1], w[2], w[3])),
        max_error,
        median: (options.median_filter_window > 0)
            .then(|| MedianFilter::new(options.median_filter_window, options.median_filter_threshold)),
    };
    let mut rasterizer = OrthoRasterizer::new(transformed, raster_options)?;

    let mut report = PipelineReport {
        num_points: rasterizer.num_valid_points(),
        max_error,
        ..Default::default()
    };
    for (i, spacing) in options.spacings().into_iter().enumerate() {
        let prefix = if i == 0 { prefix.clone() } else { format!("{}_{}", prefix, i) };
        let (outputs, spacing) = rasterize_spacing(
            options,
            &mut rasterizer,
            textures.as_ref(),
            &mut georef,
            spacing,
            &prefix,
            sink,
        )?;
        report.outputs.extend(outputs);
        report.spacings.push(spacing);
    }

    // Dropping the cloud removes the chip stores.
    drop(rasterizer);
    log::info!("finish processing in {:?}", start.elapsed());
    Ok(report)
}
