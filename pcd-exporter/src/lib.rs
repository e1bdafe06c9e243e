pub mod error;
pub mod geotiff;
pub mod memory;
pub mod sink;

pub use error::ExportError;
pub use geotiff::GeoTiffWriter;
pub use memory::MemorySink;
pub use sink::{write_raster, RasterMetadata, RasterSink, SampleFormat};
