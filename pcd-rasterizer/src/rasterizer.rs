use std::time::Instant;

use itertools::iproduct;
use pcd_core::pointcloud::{
    block::{PixelRect, PointBlock},
    image::PointImage,
    point::{is_valid_geodetic, BoundingVolume},
};
use projection_transform::georef::GeoTransform;
use rayon::prelude::*;

use crate::{error::RasterizeError, median::MedianFilter, outlier::error_magnitude, raster::Raster};

/// Input blocks visited during initialization and gridding.
const INPUT_BLOCK: usize = 256;
/// Output tiles gridded in parallel.
const OUTPUT_TILE: usize = 256;

/// What the gridded raster holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridValue {
    Height,
    Channel(usize),
}

impl GridValue {
    fn channel(&self) -> usize {
        match self {
            GridValue::Height => 2,
            GridValue::Channel(channel) => *channel,
        }
    }
}

/// User supplied output extent in projected (or lon/lat) coordinates. The
/// corners may be given in any order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjWin {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ProjWin {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RasterizerOptions {
    /// Search radius as a multiple of the spacing; 0 uses the spacing.
    pub search_radius_factor: f64,
    pub projwin: Option<ProjWin>,
    /// Points with a larger error magnitude are not gridded.
    pub max_error: Option<f64>,
    pub median: Option<MedianFilter>,
}

#[derive(Debug, Clone, Copy)]
struct BlockInfo {
    rect: PixelRect,
    bbox: BoundingVolume,
}

#[derive(Debug, Clone, Copy, Default)]
struct BlockStats {
    valid: usize,
    distance_sum: f64,
    distance_count: usize,
}

/// Output grid for one spacing. Pixel (c, r) is centered on
/// `(min_x + c * spacing, max_y - r * spacing)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Grid {
    spacing: f64,
    radius: f64,
    min_x: f64,
    max_y: f64,
    width: usize,
    height: usize,
}

/// Grids a geodetic or projected point-cloud image onto a regular raster
/// with a search-radius Gaussian weighted average.
pub struct OrthoRasterizer<I: PointImage> {
    cloud: I,
    options: RasterizerOptions,
    blocks: Vec<BlockInfo>,
    bbox: BoundingVolume,
    num_valid: usize,
    default_spacing: f64,
    grid: Option<Grid>,
}

impl<I: PointImage> OrthoRasterizer<I> {
    /// Visits every block of `cloud` once to collect per-block bounding
    /// boxes, the cloud bounding box and the default spacing.
    pub fn new(cloud: I, options: RasterizerOptions) -> Result<Self, RasterizeError> {
        let start = Instant::now();
        log::info!("computing the bounding box of the point cloud");

        let mut rasterizer = Self {
            cloud,
            options,
            blocks: Vec::new(),
            bbox: BoundingVolume::empty(),
            num_valid: 0,
            default_spacing: 0.0,
            grid: None,
        };

        let rects = PixelRect::tiles(rasterizer.cloud.width(), rasterizer.cloud.height(), INPUT_BLOCK, INPUT_BLOCK);
        let visited = rects
            .into_par_iter()
            .map(|rect| {
                let block = rasterizer.load_block(rect)?;
                Ok(summarize(&block))
            })
            .collect::<Result<Vec<_>, RasterizeError>>()?;

        let mut totals = BlockStats::default();
        for (info, stats) in visited {
            totals.valid += stats.valid;
            totals.distance_sum += stats.distance_sum;
            totals.distance_count += stats.distance_count;
            if !info.bbox.is_empty() {
                rasterizer.bbox.merge(&info.bbox);
                rasterizer.blocks.push(info);
            }
        }
        if rasterizer.bbox.is_empty() {
            return Err(RasterizeError::EmptyCloud);
        }

        rasterizer.num_valid = totals.valid;
        rasterizer.default_spacing = default_spacing(&rasterizer.bbox, &totals);
        log::info!(
            "found {} valid points in {} blocks, default spacing {} in {:?}",
            totals.valid,
            rasterizer.blocks.len(),
            rasterizer.default_spacing,
            start.elapsed()
        );
        Ok(rasterizer)
    }

    pub fn cloud(&self) -> &I {
        &self.cloud
    }

    /// Bounding box of the valid inlier points.
    pub fn bbox(&self) -> BoundingVolume {
        self.bbox
    }

    pub fn num_valid_points(&self) -> usize {
        self.num_valid
    }

    pub fn default_spacing(&self) -> f64 {
        self.default_spacing
    }

    /// Spacing of the current grid; the default spacing before
    /// `initialize_spacing`.
    pub fn spacing(&self) -> f64 {
        self.grid.map_or(self.default_spacing, |g| g.spacing)
    }

    pub fn search_radius(&self) -> f64 {
        self.grid.map_or(0.0, |g| g.radius)
    }

    pub fn width(&self) -> usize {
        self.grid.map_or(0, |g| g.width)
    }

    pub fn height(&self) -> usize {
        self.grid.map_or(0, |g| g.height)
    }

    /// Sets up the output grid for `spacing`; 0 selects the default spacing.
    pub fn initialize_spacing(&mut self, spacing: f64) -> Result<(), RasterizeError> {
        if !spacing.is_finite() || spacing < 0.0 {
            return Err(RasterizeError::InvalidSpacing(spacing));
        }
        let spacing = if spacing == 0.0 { self.default_spacing } else { spacing };
        if spacing <= 0.0 {
            return Err(RasterizeError::InvalidSpacing(spacing));
        }

        let (min_x, max_y, width, height) = match self.options.projwin {
            Some(win) => (
                win.min_x,
                win.max_y,
                (((win.max_x - win.min_x) / spacing).round() as usize).max(1),
                (((win.max_y - win.min_y) / spacing).round() as usize).max(1),
            ),
            None => {
                let min_x = (self.bbox.min[0] / spacing).floor() * spacing;
                let max_x = (self.bbox.max[0] / spacing).ceil() * spacing;
                let min_y = (self.bbox.min[1] / spacing).floor() * spacing;
                let max_y = (self.bbox.max[1] / spacing).ceil() * spacing;
                (
                    min_x,
                    max_y,
                    ((max_x - min_x) / spacing).round() as usize + 1,
                    ((max_y - min_y) / spacing).round() as usize + 1,
                )
            }
        };

        let radius = if self.options.search_radius_factor > 0.0 {
            self.options.search_radius_factor * spacing
        } else {
            spacing
        };

        log::info!("output grid {}x{} at spacing {}, search radius {}", width, height, spacing, radius);
        self.grid = Some(Grid {
            spacing,
            radius,
            min_x,
            max_y,
            width,
            height,
        });
        Ok(())
    }

    /// Pixel-as-area transform of the current grid: the origin is the outer
    /// corner of pixel (0, 0).
    pub fn geo_transform(&self) -> GeoTransform {
        match self.grid {
            Some(g) => GeoTransform {
                origin_x: g.min_x - 0.5 * g.spacing,
                origin_y: g.max_y + 0.5 * g.spacing,
                pixel_width: g.spacing,
                pixel_height: -g.spacing,
            },
            None => GeoTransform::default(),
        }
    }

    /// Grids a channel of the cloud.
    pub fn grid(&self, value: GridValue, nodata: f32) -> Result<Raster, RasterizeError> {
        let channels = self.cloud.num_channels();
        let channel = value.channel();
        if channel >= channels {
            return Err(RasterizeError::InvalidChannel { channel, channels });
        }
        self.grid_with::<PointBlock>(None, channel, nodata)
    }

    /// Grids the first channel of `texture`, an image the same size as the
    /// cloud whose pixels are co-registered with the points.
    pub fn grid_texture<T: PointImage>(&self, texture: &T, nodata: f32) -> Result<Raster, RasterizeError> {
        if texture.width() != self.cloud.width() || texture.height() != self.cloud.height() {
            return Err(RasterizeError::TextureSize {
                texture: (texture.width(), texture.height()),
                cloud: (self.cloud.width(), self.cloud.height()),
            });
        }
        self.grid_with(Some(texture), 0, nodata)
    }

    fn grid_with<T: PointImage>(
        &self,
        texture: Option<&T>,
        channel: usize,
        nodata: f32,
    ) -> Result<Raster, RasterizeError> {
        let grid = self.grid.ok_or(RasterizeError::InvalidSpacing(0.0))?;
        let start = Instant::now();

        let tiles = PixelRect::tiles(grid.width, grid.height, OUTPUT_TILE, OUTPUT_TILE);
        let gridded = tiles
            .into_par_iter()
            .map(|tile| {
                let values = self.grid_tile(&grid, tile, texture, channel, nodata)?;
                Ok((tile, values))
            })
            .collect::<Result<Vec<_>, RasterizeError>>()?;

        let mut raster = Raster::new(grid.width, grid.height, 1, nodata);
        for (tile, values) in gridded {
            raster.write_tile(tile, &values);
        }
        log::debug!("gridded channel {} in {:?}", channel, start.elapsed());
        Ok(raster)
    }

    fn grid_tile<T: PointImage>(
        &self,
        grid: &Grid,
        tile: PixelRect,
        texture: Option<&T>,
        channel: usize,
        nodata: f32,
    ) -> Result<Vec<f32>, RasterizeError> {
        let min = [
            grid.min_x + tile.col as f64 * grid.spacing - grid.radius,
            grid.max_y - (tile.bottom() - 1) as f64 * grid.spacing - grid.radius,
        ];
        let max = [
            grid.min_x + (tile.right() - 1) as f64 * grid.spacing + grid.radius,
            grid.max_y - tile.row as f64 * grid.spacing + grid.radius,
        ];

        let mut weights = vec![0.0f64; tile.area()];
        let mut sums = vec![0.0f64; tile.area()];
        let sigma = grid.radius / 2.0;
        let radius2 = grid.radius * grid.radius;

        for info in self.blocks.iter().filter(|b| b.bbox.intersects_xy(min, max)) {
            let block = self.load_block(info.rect)?;
            let texels = match texture {
                Some(t) => Some(t.read_block(info.rect).map_err(RasterizeError::from_source)?),
                None => None,
            };

            for (index, pixel) in block.pixels().enumerate() {
                let z = pixel[2];
                if z.is_nan() {
                    continue;
                }
                let value = match &texels {
                    Some(t) => t.data[index * t.channels],
                    None => pixel[channel],
                };
                if !value.is_finite() {
                    continue;
                }
                let (x, y) = (pixel[0], pixel[1]);
                if x < min[0] || x > max[0] || y < min[1] || y > max[1] {
                    continue;
                }
                let scale = match error_magnitude(pixel) {
                    Some(e) if e > 0.0 => 1.0 / (e * e),
                    _ => 1.0,
                };

                let first_col = ((x - grid.radius - grid.min_x) / grid.spacing).ceil().max(tile.col as f64) as usize;
                let last_col = ((x + grid.radius - grid.min_x) / grid.spacing).floor();
                let first_row = ((grid.max_y - y - grid.radius) / grid.spacing).ceil().max(tile.row as f64) as usize;
                let last_row = ((grid.max_y - y + grid.radius) / grid.spacing).floor();
                if last_col < first_col as f64 || last_row < first_row as f64 {
                    continue;
                }
                let last_col = (last_col as usize).min(tile.right() - 1);
                let last_row = (last_row as usize).min(tile.bottom() - 1);

                for (row, col) in iproduct!(first_row..=last_row, first_col..=last_col) {
                    let dx = grid.min_x + col as f64 * grid.spacing - x;
                    let dy = grid.max_y - row as f64 * grid.spacing - y;
                    let d2 = dx * dx + dy * dy;
                    if d2 > radius2 {
                        continue;
                    }
                    let w = (-d2 / (2.0 * sigma * sigma)).exp() * scale;
                    let i = (row - tile.row) * tile.width + (col - tile.col);
                    weights[i] += w;
                    sums[i] += w * value;
                }
            }
        }

        Ok(weights
            .iter()
            .zip(&sums)
            .map(|(w, s)| if *w > 0.0 { (s / w) as f32 } else { nodata })
            .collect())
    }

    /// Reads `rect` and applies the outlier policy and the median filter.
    /// Rejected points become no-data.
    fn load_block(&self, rect: PixelRect) -> Result<PointBlock, RasterizeError> {
        let read = match self.options.median {
            Some(median) => median.expand(&rect, self.cloud.width(), self.cloud.height()),
            None => rect,
        };
        let mut block = self.cloud.read_block(read).map_err(RasterizeError::from_source)?;

        if let Some(max_error) = self.options.max_error {
            for pixel in block.pixels_mut() {
                if error_magnitude(pixel).is_some_and(|e| e > max_error) {
                    pixel[2] = f64::NAN;
                }
            }
        }

        Ok(match self.options.median {
            Some(median) => median.apply(&block, rect),
            None => block,
        })
    }
}

fn summarize(block: &PointBlock) -> (BlockInfo, BlockStats) {
    let bbox: BoundingVolume = block.points().filter(is_valid_geodetic).collect();
    let mut stats = BlockStats {
        valid: block.points().filter(is_valid_geodetic).count(),
        ..Default::default()
    };
    for row in 0..block.height() {
        for col in 1..block.width() {
            let (a, b) = (block.point(col - 1, row), block.point(col, row));
            if is_valid_geodetic(&a) && is_valid_geodetic(&b) {
                stats.distance_sum += (a.x - b.x).hypot(a.y - b.y);
                stats.distance_count += 1;
            }
        }
    }
    (BlockInfo { rect: block.rect, bbox }, stats)
}

/// Mean distance between horizontally adjacent points, or the extent
/// divided by the square root of the point count when that is degenerate.
fn default_spacing(bbox: &BoundingVolume, stats: &BlockStats) -> f64 {
    if stats.distance_count > 0 {
        let mean = stats.distance_sum / stats.distance_count as f64;
        if mean > 0.0 {
            return mean;
        }
    }
    let extent = bbox.width().max(bbox.height());
    if extent > 0.0 {
        extent / (stats.valid.max(1) as f64).sqrt()
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::point::Point;

    use super::*;

    const NODATA: f32 = -32768.0;

    fn plane(cols: usize, rows: usize) -> PointBlock {
        let mut cloud = PointBlock::new(PixelRect::new(0, 0, cols, rows), 3);
        for (row, col) in iproduct!(0..rows, 0..cols) {
            cloud.set_point(col, row, &Point::new(col as f64, -(row as f64), 3.0));
        }
        cloud
    }

    #[test]
    fn co_located_points_use_the_error_weighted_average() {
        let mut cloud = PointBlock::new(PixelRect::new(0, 0, 3, 1), 4);
        for (col, (z, e)) in [(1.0, 1.0), (2.0, 2.0), (3.0, 4.0)].into_iter().enumerate() {
            cloud.pixel_mut(col, 0).copy_from_slice(&[5.0, 5.0, z, e]);
        }
        let options = RasterizerOptions {
            search_radius_factor: 1.0,
            ..Default::default()
        };
        let mut rasterizer = OrthoRasterizer::new(cloud, options).unwrap();
        rasterizer.initialize_spacing(10.0).unwrap();
        assert_eq!((rasterizer.width(), rasterizer.height()), (2, 2));

        let dem = rasterizer.grid(GridValue::Height, NODATA).unwrap();
        // Weights 1, 1/4 and 1/16 give 27/21 rather than the mean 2.
        for value in &dem.data {
            assert!((*value as f64 - 9.0 / 7.0).abs() < 1e-6, "{}", value);
        }
    }

    #[test]
    fn spacing_and_transform() {
        let mut rasterizer = OrthoRasterizer::new(plane(10, 5), RasterizerOptions::default()).unwrap();
        assert_eq!(rasterizer.default_spacing(), 1.0);
        assert_eq!(rasterizer.bbox().min, [0.0, -4.0, 3.0]);

        rasterizer.initialize_spacing(0.0).unwrap();
        assert_eq!((rasterizer.width(), rasterizer.height()), (10, 5));
        assert_eq!(rasterizer.search_radius(), 1.0);
        let transform = rasterizer.geo_transform();
        assert_eq!((transform.origin_x, transform.origin_y), (-0.5, 0.5));
        assert_eq!(transform.pixel_height, -1.0);

        let dem = rasterizer.grid(GridValue::Height, NODATA).unwrap();
        assert_eq!(dem.valid_count(), 50);
        assert!(dem.data.iter().all(|v| (v - 3.0).abs() < 1e-6));

        assert!(matches!(
            rasterizer.initialize_spacing(-1.0),
            Err(RasterizeError::InvalidSpacing(_))
        ));
    }

    #[test]
    fn projwin_sets_the_grid() {
        let options = RasterizerOptions {
            search_radius_factor: 0.5,
            projwin: Some(ProjWin::new(2.0, -1.0, 6.0, 1.0)),
            ..Default::default()
        };
        let mut rasterizer = OrthoRasterizer::new(plane(10, 5), options).unwrap();
        rasterizer.initialize_spacing(1.0).unwrap();
        assert_eq!((rasterizer.width(), rasterizer.height()), (4, 2));
        let transform = rasterizer.geo_transform();
        assert_eq!((transform.origin_x, transform.origin_y), (1.5, 1.5));

        // The top row is centered on y = 1, beyond the cloud.
        let dem = rasterizer.grid(GridValue::Height, NODATA).unwrap();
        assert_eq!(dem.get(0, 0, 0), NODATA);
        assert!((dem.get(0, 1, 0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn outliers_are_not_gridded() {
        let mut cloud = PointBlock::new(PixelRect::new(0, 0, 2, 1), 4);
        cloud.pixel_mut(0, 0).copy_from_slice(&[0.0, 0.0, 1.0, 0.5]);
        cloud.pixel_mut(1, 0).copy_from_slice(&[0.0, 0.0, 9.0, 5.0]);
        let options = RasterizerOptions {
            max_error: Some(1.0),
            ..Default::default()
        };
        let mut rasterizer = OrthoRasterizer::new(cloud, options).unwrap();
        assert_eq!(rasterizer.num_valid_points(), 1);
        rasterizer.initialize_spacing(1.0).unwrap();
        let dem = rasterizer.grid(GridValue::Height, NODATA).unwrap();
        assert_eq!(dem.data, vec![1.0]);
    }

    #[test]
    fn texture_follows_the_points() {
        let cloud = plane(4, 4);
        let mut texture = PointBlock::new(PixelRect::new(0, 0, 4, 4), 1);
        for (i, pixel) in texture.pixels_mut().enumerate() {
            pixel[0] = i as f64;
        }
        let mut rasterizer = OrthoRasterizer::new(cloud, RasterizerOptions::default()).unwrap();
        rasterizer.initialize_spacing(1.0).unwrap();
        let drg = rasterizer.grid_texture(&texture, NODATA).unwrap();
        assert!(drg.get(3, 0, 0) > drg.get(0, 0, 0));
        assert!(drg.get(0, 3, 0) > drg.get(0, 0, 0));

        let small = PointBlock::new(PixelRect::new(0, 0, 2, 2), 1);
        assert!(matches!(
            rasterizer.grid_texture(&small, NODATA),
            Err(RasterizeError::TextureSize { .. })
        ));
        assert!(matches!(
            rasterizer.grid(GridValue::Channel(3), NODATA),
            Err(RasterizeError::InvalidChannel { channel: 3, channels: 3 })
        ));
    }

    #[test]
    fn cloud_without_valid_points_is_empty() {
        let cloud = PointBlock::filled(PixelRect::new(0, 0, 4, 4), 3, f64::NAN);
        assert!(matches!(
            OrthoRasterizer::new(cloud, RasterizerOptions::default()),
            Err(RasterizeError::EmptyCloud)
        ));
    }
}
