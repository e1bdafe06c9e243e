pub mod csv;
pub mod las;

use std::path::Path;

use pcd_core::pointcloud::point::Point;
use projection_transform::GeoReference;

use crate::{csv_conv::CsvConv, error::ReaderError, path_extension};

pub use self::{csv::CsvPointReader, las::LasPointReader};

/// Sequential, single pass source of points. Each instance is the one
/// cursor over its file; reading again requires opening a new reader.
pub trait PointReader {
    fn num_points(&self) -> u64;

    fn georef(&self) -> Option<&GeoReference>;

    fn has_georef(&self) -> bool {
        self.georef().is_some()
    }

    /// Advances to the next point. Returns false at the end of the stream,
    /// and `ReaderError::Exhausted` if called again after that.
    fn read_next_point(&mut self) -> Result<bool, ReaderError>;

    /// The point the last successful `read_next_point` moved to.
    fn current_point(&self) -> Result<Point, ReaderError>;

    fn next_point(&mut self) -> Result<Option<Point>, ReaderError> {
        if self.read_next_point()? {
            self.current_point().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<R: PointReader + ?Sized> PointReader for Box<R> {
    fn num_points(&self) -> u64 {
        (**self).num_points()
    }

    fn georef(&self) -> Option<&GeoReference> {
        (**self).georef()
    }

    fn read_next_point(&mut self) -> Result<bool, ReaderError> {
        (**self).read_next_point()
    }

    fn current_point(&self) -> Result<Point, ReaderError> {
        (**self).current_point()
    }
}

/// Position of a reader in its stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Cursor {
    BeforeFirst,
    At(Point),
    Finished,
}

impl Cursor {
    pub(crate) fn point(&self) -> Result<Point, ReaderError> {
        match self {
            Cursor::At(p) => Ok(*p),
            _ => Err(ReaderError::NoCurrentPoint),
        }
    }
}

/// Opens the point reader matching the file extension.
pub fn open_point_reader(
    path: &Path,
    csv_conv: &CsvConv,
    csv_georef: Option<&GeoReference>,
) -> Result<Box<dyn PointReader>, ReaderError> {
    match path_extension(path) {
        Some(ext) if ext.is_las() => Ok(Box::new(LasPointReader::new(path)?)),
        Some(ext) if ext.is_csv() => Ok(Box::new(CsvPointReader::new(
            path,
            csv_conv.clone(),
            csv_georef.cloned(),
        )?)),
        _ => Err(ReaderError::UnsupportedInput(path.display().to_string())),
    }
}

/// Georeference of the first LAS file carrying one.
pub fn georef_from_pc_files(files: &[&Path]) -> Result<Option<GeoReference>, ReaderError> {
    for file in files {
        if path_extension(file).is_some_and(|e| e.is_las()) {
            if let Some(georef) = las::georef_from_las(file)? {
                return Ok(Some(georef));
            }
        }
    }
    Ok(None)
}

/// Yields the points of a reader in chunks of at most `chunk_size`.
pub struct PointIterator<R: PointReader> {
    reader: R,
    chunk_size: usize,
}

impl<R: PointReader> PointIterator<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: PointReader> Iterator for PointIterator<R> {
    type Item = Result<Vec<Point>, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buffer = Vec::with_capacity(self.chunk_size);

        for _ in 0..self.chunk_size {
            match self.reader.next_point() {
                Ok(Some(p)) => buffer.push(p),
                Ok(None) => break,
                Err(ReaderError::Exhausted(_)) if buffer.is_empty() => return None,
                Err(e) => return Some(Err(e)),
            }
        }

        if buffer.is_empty() {
            None
        } else {
            Some(Ok(buffer))
        }
    }
}
