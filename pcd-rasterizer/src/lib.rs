pub mod error;
pub mod hole_fill;
pub mod median;
pub mod outlier;
pub mod postprocess;
pub mod raster;
pub mod rasterizer;

pub use error::RasterizeError;
pub use hole_fill::fill_holes;
pub use median::MedianFilter;
pub use outlier::{estimate_max_error, ErrorRangeEstimator, OutlierPolicy};
pub use raster::Raster;
pub use rasterizer::{GridValue, OrthoRasterizer, ProjWin, RasterizerOptions};
