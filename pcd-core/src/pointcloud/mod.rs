pub mod block;
pub mod cache;
pub mod decimation;
pub mod image;
pub mod point;
