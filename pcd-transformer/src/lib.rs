pub mod builder;
pub mod error;
pub mod runner;
pub mod transform;

pub use builder::{DemTransformBuilder, TransformBuilder};
pub use error::TransformError;
pub use runner::TransformedCloud;
