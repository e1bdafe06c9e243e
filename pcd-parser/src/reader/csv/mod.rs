use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
};

use pcd_core::pointcloud::point::Point;
use projection_transform::GeoReference;

use super::{Cursor, PointReader};
use crate::{
    csv_conv::{csv_file_size, is_valid_csv_line, CsvConv, CsvFormat},
    error::{CsvError, ReaderError},
};

/// Reads points from a delimited text file laid out as described by a
/// `CsvConv`. Projected and geodetic schemas yield (x, y, height) in their
/// own coordinates, with `georef` describing them.
pub struct CsvPointReader {
    pub path: PathBuf,
    csv_conv: CsvConv,
    georef: Option<GeoReference>,
    num_points: u64,
    lines: Lines<BufReader<File>>,
    is_first_line: bool,
    cursor: Cursor,
}

impl CsvPointReader {
    pub fn new(path: &Path, csv_conv: CsvConv, georef: Option<GeoReference>) -> Result<Self, ReaderError> {
        if !csv_conv.is_configured() {
            return Err(CsvError::Format {
                format: String::new(),
                reason: "the CSV format was not specified".to_string(),
            }
            .into());
        }
        if csv_conv.format != CsvFormat::Xyz && georef.is_none() {
            return Err(CsvError::MissingGeoreference.into());
        }
        let georef = if csv_conv.format == CsvFormat::Xyz { None } else { georef };

        let num_points = csv_file_size(path)?;
        let lines = BufReader::new(File::open(path)?).lines();

        Ok(Self {
            path: path.to_path_buf(),
            csv_conv,
            georef,
            num_points,
            lines,
            is_first_line: true,
            cursor: Cursor::BeforeFirst,
        })
    }
}

impl PointReader for CsvPointReader {
    fn num_points(&self) -> u64 {
        self.num_points
    }

    fn georef(&self) -> Option<&GeoReference> {
        self.georef.as_ref()
    }

    fn read_next_point(&mut self) -> Result<bool, ReaderError> {
        if self.cursor == Cursor::Finished {
            return Err(ReaderError::Exhausted(self.path.display().to_string()));
        }

        for line in self.lines.by_ref() {
            let line = line?;
            if !is_valid_csv_line(&line) {
                continue;
            }
            let (record, success) = self.csv_conv.parse_csv_line(&mut self.is_first_line, &line)?;
            if !success {
                // header
                continue;
            }
            let point = self
                .csv_conv
                .csv_to_cartesian_or_point_height(&record, self.georef.as_ref(), true)?;
            self.cursor = Cursor::At(point);
            return Ok(true);
        }

        self.cursor = Cursor::Finished;
        Ok(false)
    }

    fn current_point(&self) -> Result<Point, ReaderError> {
        self.cursor.point()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use projection_transform::{Datum, Projection};

    use super::*;
    use crate::reader::PointIterator;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_points_after_header() {
        let file = write_csv("# generated\nx,y,z\n1,2,3\n4,5,6\n");
        let conv = CsvConv::from_format("1:x 2:y 3:z", "").unwrap();
        let mut reader = CsvPointReader::new(file.path(), conv, None).unwrap();
        assert_eq!(reader.num_points(), 3);
        assert!(!reader.has_georef());

        assert!(matches!(reader.current_point(), Err(ReaderError::NoCurrentPoint)));
        assert!(reader.read_next_point().unwrap());
        assert_eq!(reader.current_point().unwrap(), Point::new(1.0, 2.0, 3.0));
        assert_eq!(reader.next_point().unwrap(), Some(Point::new(4.0, 5.0, 6.0)));
        assert!(!reader.read_next_point().unwrap());
        assert!(matches!(reader.current_point(), Err(ReaderError::NoCurrentPoint)));
        assert!(matches!(reader.read_next_point(), Err(ReaderError::Exhausted(_))));
    }

    #[test]
    fn bad_line_after_data_is_fatal() {
        let file = write_csv("1 2 3\nfoo bar baz\n");
        let conv = CsvConv::from_format("1:x 2:y 3:z", "").unwrap();
        let mut reader = CsvPointReader::new(file.path(), conv, None).unwrap();
        assert!(reader.read_next_point().unwrap());
        assert!(matches!(
            reader.read_next_point(),
            Err(ReaderError::Csv(CsvError::Parse(_)))
        ));
    }

    #[test]
    fn geodetic_points_keep_their_coordinates() {
        let file = write_csv("lon lat h\n10 20 30\n");
        let conv = CsvConv::from_format("1:lon 2:lat 3:height_above_datum", "").unwrap();
        let georef = GeoReference::new(Datum::wgs84(), Projection::Geographic);
        let mut reader = CsvPointReader::new(file.path(), conv.clone(), Some(georef)).unwrap();
        assert!(reader.has_georef());
        assert_eq!(reader.next_point().unwrap(), Some(Point::new(10.0, 20.0, 30.0)));

        assert!(matches!(
            CsvPointReader::new(file.path(), conv, None),
            Err(ReaderError::Csv(CsvError::MissingGeoreference))
        ));
    }

    #[test]
    fn chunks_cover_all_points() {
        let contents: String = (0..10).map(|i| format!("{i} {i} {i}\n")).collect();
        let file = write_csv(&contents);
        let conv = CsvConv::from_format("1:x 2:y 3:z", "").unwrap();
        let reader = CsvPointReader::new(file.path(), conv, None).unwrap();
        let chunks: Vec<Vec<Point>> = PointIterator::new(reader, 4).map(|c| c.unwrap()).collect();
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![4, 4, 2]);
    }
}
