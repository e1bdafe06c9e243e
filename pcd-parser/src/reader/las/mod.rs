use std::path::{Path, PathBuf};

use las::Reader;
use pcd_core::pointcloud::point::Point;
use projection_transform::GeoReference;

use super::{Cursor, PointReader};
use crate::error::ReaderError;

const WKT_USER_ID: &str = "LASF_Projection";
const WKT_RECORD_ID: u16 = 2112;

fn wkt_from_header(header: &las::Header) -> Option<String> {
    header
        .vlrs()
        .iter()
        .chain(header.evlrs().iter())
        .find(|vlr| vlr.user_id == WKT_USER_ID && vlr.record_id == WKT_RECORD_ID)
        .map(|vlr| {
            String::from_utf8_lossy(&vlr.data)
                .trim_end_matches('\0')
                .to_string()
        })
        .filter(|wkt| !wkt.trim().is_empty())
}

/// Georeference stored as OGC WKT in the header of a LAS file.
pub fn georef_from_las(path: &Path) -> Result<Option<GeoReference>, ReaderError> {
    let reader = Reader::from_path(path)?;
    match wkt_from_header(reader.header()) {
        Some(wkt) => Ok(Some(GeoReference::from_wkt(&wkt)?)),
        None => Ok(None),
    }
}

pub fn las_file_size(path: &Path) -> Result<u64, ReaderError> {
    Ok(Reader::from_path(path)?.header().number_of_points())
}

pub struct LasPointReader {
    pub path: PathBuf,
    reader: Reader,
    num_points: u64,
    georef: Option<GeoReference>,
    cursor: Cursor,
}

impl LasPointReader {
    pub fn new(path: &Path) -> Result<Self, ReaderError> {
        let reader = Reader::from_path(path)?;
        let num_points = reader.header().number_of_points();
        let georef = match wkt_from_header(reader.header()) {
            Some(wkt) => Some(GeoReference::from_wkt(&wkt)?),
            None => None,
        };
        log::debug!("{}: {} points, georeferenced: {}", path.display(), num_points, georef.is_some());

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            num_points,
            georef,
            cursor: Cursor::BeforeFirst,
        })
    }
}

impl PointReader for LasPointReader {
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
        match self.reader.read_point()? {
            Some(p) => {
                self.cursor = Cursor::At(Point::new(p.x, p.y, p.z));
                Ok(true)
            }
            None => {
                self.cursor = Cursor::Finished;
                Ok(false)
            }
        }
    }

    fn current_point(&self) -> Result<Point, ReaderError> {
        self.cursor.point()
    }
}

#[cfg(test)]
mod tests {
    use las::{Builder, Transform, Vector, Vlr, Writer};
    use projection_transform::Projection;

    use super::*;

    const UTM_WKT: &str = r#"PROJCS["WGS 84 / UTM zone 15N",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"]]"#;

    fn write_las(path: &Path, points: &[Point], wkt: Option<&str>) {
        let mut builder = Builder::from((1, 4));
        let transform = Transform {
            scale: 0.01,
            offset: 500_000.0,
        };
        builder.transforms = Vector {
            x: transform,
            y: transform,
            z: Transform {
                scale: 0.01,
                offset: 0.0,
            },
        };
        if let Some(wkt) = wkt {
            builder.has_wkt_crs = true;
            builder.vlrs.push(Vlr {
                user_id: WKT_USER_ID.to_string(),
                record_id: WKT_RECORD_ID,
                description: "OGC WKT".to_string(),
                data: wkt.as_bytes().to_vec(),
            });
        }
        let mut writer = Writer::from_path(path, builder.into_header().unwrap()).unwrap();
        for p in points {
            writer
                .write_point(las::Point {
                    x: p.x,
                    y: p.y,
                    z: p.z,
                    ..Default::default()
                })
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(LasPointReader::new(Path::new("/nonexistent/cloud.las")).is_err());
        assert!(las_file_size(Path::new("/nonexistent/cloud.laz")).is_err());
    }

    #[test]
    fn reads_scaled_points_and_wkt_georef() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.las");
        let points = vec![
            Point::new(500_100.25, 4_100_000.5, 12.34),
            Point::new(499_900.0, 4_100_010.75, -3.5),
            Point::new(500_000.01, 4_099_990.0, 0.0),
        ];
        write_las(&path, &points, Some(UTM_WKT));

        assert_eq!(las_file_size(&path).unwrap(), 3);
        let mut reader = LasPointReader::new(&path).unwrap();
        assert_eq!(reader.num_points(), 3);
        let georef = reader.georef().unwrap();
        assert_eq!(georef.projection, Projection::Utm { zone: 15, north: true });
        assert!((georef.datum.semi_major_axis - 6_378_137.0).abs() < 1e-6);

        let mut read = Vec::new();
        while let Some(p) = reader.next_point().unwrap() {
            read.push(p);
        }
        assert_eq!(read.len(), points.len());
        for (a, b) in read.iter().zip(&points) {
            assert!((a - b).norm() < 0.006, "{} vs {}", a, b);
        }
        assert!(matches!(reader.read_next_point(), Err(ReaderError::Exhausted(_))));

        assert_eq!(
            georef_from_las(&path).unwrap().map(|g| g.projection),
            Some(Projection::Utm { zone: 15, north: true })
        );
    }

    #[test]
    fn files_without_wkt_have_no_georef() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.las");
        write_las(&path, &[Point::new(1.0, 2.0, 3.0)], None);

        let mut reader = LasPointReader::new(&path).unwrap();
        assert!(!reader.has_georef());
        assert!(georef_from_las(&path).unwrap().is_none());
        let p = reader.next_point().unwrap().unwrap();
        assert!((p - Point::new(1.0, 2.0, 3.0)).norm() < 0.006);
    }
}
