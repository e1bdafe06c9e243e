pub mod cartesian;
pub mod ellipsoid;
pub mod error;
pub mod georef;
pub mod projection;

pub use ellipsoid::Datum;
pub use error::ProjectionError;
pub use georef::{GeoReference, GeoTransform};
pub use projection::{Projection, ProjectionParams};
