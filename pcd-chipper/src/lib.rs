pub mod chip_image;
pub mod chipper;
pub mod cloud;
pub mod error;
pub mod store;

pub use chip_image::{chip_point_source, ChipImage, ChipLayout};
pub use cloud::{ChippedCloud, CloudSource, CompositeCloud};
pub use error::ChipperError;
pub use store::TileStore;

/// Side of the square blocks a chip is partitioned into.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// Side of the square tiles read from a point source in one pass.
pub const DEFAULT_TILE_LEN: usize = 2048;
