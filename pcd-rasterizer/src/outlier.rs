use std::time::Instant;

use pcd_core::pointcloud::{
    block::PixelRect,
    decimation::decimator::{PointCloudDecimator, StrideDecimator},
    image::PointImage,
};
use rayon::prelude::*;

use crate::error::RasterizeError;

const SAMPLE_BLOCK: usize = 256;
const FIRST_LEVEL: u32 = 7;
const LAST_LEVEL: u32 = 18;

/// How points with a large triangulation error are excluded from gridding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutlierPolicy {
    None,
    /// Threshold estimated from the error distribution: the `percentile`
    /// error times `factor` times 4.
    Percentile { percentile: f64, factor: f64 },
    Fixed { max_error: f64 },
}

/// Magnitude of the error stored with a point: the fourth channel, or the
/// norm of channels 4 to 6.
pub fn error_magnitude(pixel: &[f64]) -> Option<f64> {
    match pixel.len() {
        4 => Some(pixel[3]),
        6 => Some((pixel[3] * pixel[3] + pixel[4] * pixel[4] + pixel[5] * pixel[5]).sqrt()),
        _ => None,
    }
}

/// Collects positive error samples and reports a scaled percentile of
/// them. Zero, negative and NaN errors belong to invalid points and are
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct ErrorRangeEstimator {
    errors: Vec<f64>,
}

impl ErrorRangeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: f64) {
        if error > 0.0 {
            self.errors.push(error);
        }
    }

    pub fn merge(&mut self, other: ErrorRangeEstimator) {
        self.errors.extend(other.errors);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `sorted[min(n - 1, floor(percentile / 100 * n))] * factor * 4`,
    /// or None without samples.
    pub fn value(&mut self, percentile: f64, factor: f64) -> Option<f64> {
        if self.errors.is_empty() {
            return None;
        }
        self.errors.sort_by(f64::total_cmp);
        let n = self.errors.len();
        let index = ((percentile / 100.0 * n as f64).floor() as usize).min(n - 1);
        Some(self.errors[index] * factor * 4.0)
    }
}

fn sample_errors<I: PointImage>(cloud: &I, decimator: StrideDecimator) -> Result<ErrorRangeEstimator, RasterizeError> {
    PixelRect::tiles(cloud.width(), cloud.height(), SAMPLE_BLOCK, SAMPLE_BLOCK)
        .into_par_iter()
        .filter(|rect| decimator.samples_in(rect))
        .map(|rect| {
            let block = cloud.read_block(rect).map_err(RasterizeError::from_source)?;
            let pixels: Vec<&[f64]> = block.pixels().collect();
            let mut estimator = ErrorRangeEstimator::new();
            for index in decimator.decimate(&block) {
                if let Some(error) = error_magnitude(pixels[index]) {
                    estimator.push(error);
                }
            }
            Ok(estimator)
        })
        .try_reduce(ErrorRangeEstimator::new, |mut a, b| {
            a.merge(b);
            Ok(a)
        })
}

/// Estimates the outlier threshold from a subsample of the cloud, trying
/// denser subsamples until one contains valid errors. This sorts a bounded
/// subsample instead of computing an exact quantile of all points.
pub fn estimate_max_error<I: PointImage>(cloud: &I, percentile: f64, factor: f64) -> Result<f64, RasterizeError> {
    let start = Instant::now();
    for level in FIRST_LEVEL..=LAST_LEVEL {
        let decimator = StrideDecimator::for_level(cloud.width(), cloud.height(), level);
        let mut estimator = sample_errors(cloud, decimator)?;
        if let Some(value) = estimator.value(percentile, factor) {
            log::info!(
                "estimated maximum triangulation error {} from {} samples (stride {}) in {:?}",
                value,
                estimator.len(),
                decimator.stride,
                start.elapsed()
            );
            return Ok(value);
        }
        if decimator.stride == 1 {
            break;
        }
    }
    Err(RasterizeError::NoValidSamples)
}
