pub mod csv_conv;
pub mod error;
pub mod raster;
pub mod reader;

use std::path::Path;

pub use error::{CsvError, ReaderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Las,
    Laz,
    Csv,
    Txt,
    Tif,
}

impl Extension {
    pub fn is_las(&self) -> bool {
        matches!(self, Extension::Las | Extension::Laz)
    }

    pub fn is_csv(&self) -> bool {
        matches!(self, Extension::Csv | Extension::Txt)
    }

    pub fn is_las_or_csv(&self) -> bool {
        self.is_las() || self.is_csv()
    }
}

pub fn get_extension(extension: &str) -> Option<Extension> {
    match extension.to_ascii_lowercase().as_str() {
        "las" => Some(Extension::Las),
        "laz" => Some(Extension::Laz),
        "csv" => Some(Extension::Csv),
        "txt" => Some(Extension::Txt),
        "tif" | "tiff" => Some(Extension::Tif),
        _ => None,
    }
}

pub fn path_extension(path: &Path) -> Option<Extension> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(get_extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_ignore_case() {
        assert_eq!(path_extension(Path::new("a/b/cloud.LAZ")), Some(Extension::Laz));
        assert_eq!(path_extension(Path::new("pts.Txt")), Some(Extension::Txt));
        assert!(path_extension(Path::new("run-PC.tif")).is_some_and(|e| !e.is_las_or_csv()));
        assert_eq!(path_extension(Path::new("image.png")), None);
        assert_eq!(path_extension(Path::new("noext")), None);
    }
}
