use std::time::Instant;

use crossbeam::channel;
use pcd_core::pointcloud::{
    block::{PixelRect, PointBlock},
    point::{is_valid_geodetic, nodata_cartesian, nodata_geodetic, Point},
};
use pcd_parser::reader::PointReader;
use projection_transform::{cartesian::geodetic_to_cartesian, GeoReference};

use crate::{chipper::chip_with_nodata, cloud::ChippedCloud, error::ChipperError, store::TileStore};

/// Image dimensions for `num_points` points read into chips, and its
/// division into tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipLayout {
    pub num_points: u64,
    pub rows: usize,
    pub cols: usize,
    pub tile_len: usize,
    pub block_size: usize,
}

impl ChipLayout {
    pub fn new(num_points: u64, estimated_rows: usize, tile_len: usize, block_size: usize) -> Result<Self, ChipperError> {
        if block_size == 0 || tile_len == 0 || tile_len % block_size != 0 {
            return Err(ChipperError::InvalidLayout(format!(
                "tile length {} must be a positive multiple of block size {}",
                tile_len, block_size
            )));
        }

        let rows = block_size * estimated_rows.div_ceil(block_size).max(1);
        let points_per_row = (num_points as usize).div_ceil(rows);
        let cols = block_size * points_per_row.div_ceil(block_size).max(1);

        Ok(Self {
            num_points,
            rows,
            cols,
            tile_len,
            block_size,
        })
    }

    pub fn tiles_across(&self) -> usize {
        self.cols.div_ceil(self.tile_len)
    }

    pub fn tiles_down(&self) -> usize {
        self.rows.div_ceil(self.tile_len)
    }

    pub fn num_tiles(&self) -> usize {
        self.tiles_across() * self.tiles_down()
    }

    /// Row-major tile `index`, clipped to the image.
    pub fn tile_rect(&self, index: usize) -> PixelRect {
        let col = (index % self.tiles_across()) * self.tile_len;
        let row = (index / self.tiles_across()) * self.tile_len;
        PixelRect::new(
            col,
            row,
            self.tile_len.min(self.cols - col),
            self.tile_len.min(self.rows - row),
        )
    }

    /// Tiles overlapping `rect`, with their indices.
    pub fn tiles_in(&self, rect: &PixelRect) -> Vec<(usize, PixelRect)> {
        let Some(inside) = rect.intersection(&PixelRect::new(0, 0, self.cols, self.rows)) else {
            return Vec::new();
        };
        let mut tiles = Vec::new();
        for tile_row in inside.row / self.tile_len..=(inside.bottom() - 1) / self.tile_len {
            for tile_col in inside.col / self.tile_len..=(inside.right() - 1) / self.tile_len {
                let index = tile_row * self.tiles_across() + tile_col;
                tiles.push((index, self.tile_rect(index)));
            }
        }
        tiles
    }
}

/// No-data marker of the chips of a source: georeferenced sources hold
/// (x, y, height) until `chip_to_cartesian`, so their empty cells carry a
/// NaN height and a point at the origin stays valid.
pub fn chip_nodata(georef: Option<&GeoReference>) -> Point {
    if georef.is_some() {
        nodata_geodetic()
    } else {
        nodata_cartesian()
    }
}

/// Converts the valid points of a chip to cartesian coordinates when the
/// source reported them as (x, y, height) in `georef`. Empty cells become
/// cartesian no-data.
pub fn chip_to_cartesian(block: &mut PointBlock, georef: Option<&GeoReference>) -> Result<(), ChipperError> {
    let Some(georef) = georef else {
        return Ok(());
    };
    for pixel in block.pixels_mut() {
        let point = Point::new(pixel[0], pixel[1], pixel[2]);
        if !is_valid_geodetic(&point) {
            pixel[..3].copy_from_slice(nodata_cartesian().as_slice());
            continue;
        }
        let (lon, lat) = if georef.is_projected() {
            georef.point_to_lonlat(point.x, point.y)?
        } else {
            (point.x, point.y)
        };
        let xyz = geodetic_to_cartesian(&georef.datum, &Point::new(lon, lat, point.z));
        pixel[..3].copy_from_slice(xyz.as_slice());
    }
    Ok(())
}

/// Chips one tile of raw points and converts it to cartesian.
fn chip_tile(
    points: Vec<Point>,
    rect: PixelRect,
    block_size: usize,
    georef: Option<&GeoReference>,
) -> Result<PointBlock, ChipperError> {
    let mut block = chip_with_nodata(points, rect, block_size, &chip_nodata(georef))?;
    chip_to_cartesian(&mut block, georef)?;
    Ok(block)
}

/// Point-cloud image over a sequential point source. Owns the only cursor
/// of the source, so tiles are produced exactly once and in order.
pub struct ChipImage<R: PointReader> {
    reader: R,
    layout: ChipLayout,
    georef: Option<GeoReference>,
    next_tile: usize,
    finished: bool,
}

impl<R: PointReader> ChipImage<R> {
    pub fn new(reader: R, layout: ChipLayout) -> Self {
        let georef = reader.georef().cloned();
        Self {
            reader,
            layout,
            georef,
            next_tile: 0,
            finished: false,
        }
    }

    pub fn layout(&self) -> &ChipLayout {
        &self.layout
    }

    pub fn georef(&self) -> Option<&GeoReference> {
        self.georef.as_ref()
    }

    /// Reads the raw points of tile `index`, up to the tile area.
    pub fn read_tile_points(&mut self, index: usize) -> Result<(PixelRect, Vec<Point>), ChipperError> {
        if index != self.next_tile || index >= self.layout.num_tiles() {
            return Err(ChipperError::OutOfOrder {
                requested: index,
                expected: self.next_tile,
            });
        }
        self.next_tile += 1;

        let rect = self.layout.tile_rect(index);
        let mut points = Vec::with_capacity(rect.area());
        while !self.finished && points.len() < rect.area() {
            match self.reader.next_point()? {
                Some(p) => points.push(p),
                None => self.finished = true,
            }
        }
        Ok((rect, points))
    }

    /// Chipped, cartesian tile `index`.
    pub fn tile(&mut self, index: usize) -> Result<PointBlock, ChipperError> {
        let (rect, points) = self.read_tile_points(index)?;
        chip_tile(points, rect, self.layout.block_size, self.georef.as_ref())
    }
}

/// Reads a whole point source into chips stored in `store`. The calling
/// thread owns the reader and pulls tile-sized runs of points while a
/// chipping thread partitions and stores them, connected by a bounded
/// channel that keeps tile order. The reader never leaves the calling
/// thread, so it need not be `Send`.
pub fn chip_point_source<R: PointReader>(
    reader: R,
    layout: ChipLayout,
    store: TileStore,
) -> Result<ChippedCloud, ChipperError> {
    let start = Instant::now();
    let mut image = ChipImage::new(reader, layout);
    let georef = image.georef().cloned();
    let num_tiles = layout.num_tiles();

    let chipped = std::thread::scope(|scope| -> Result<usize, ChipperError> {
        let (sender, receiver) = channel::bounded::<(usize, PixelRect, Vec<Point>)>(2);
        let (store, georef) = (&store, georef.as_ref());
        let chipper = scope.spawn(move || -> Result<usize, ChipperError> {
            let mut chipped = 0;
            for (index, rect, points) in receiver {
                chipped += points.len();
                let block = chip_tile(points, rect, layout.block_size, georef)?;
                store.write_tile(index, &block)?;
            }
            Ok(chipped)
        });

        let mut read = Ok(());
        for index in 0..num_tiles {
            match image.read_tile_points(index) {
                Ok((rect, points)) => {
                    // A closed channel means the chipping thread failed.
                    if sender.send((index, rect, points)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    read = Err(e);
                    break;
                }
            }
        }
        drop(sender);

        let chipped = chipper.join().map_err(|_| ChipperError::Disconnected)??;
        read?;
        Ok(chipped)
    })?;

    if chipped as u64 != layout.num_points {
        log::warn!(
            "expected {} points but read {}",
            layout.num_points,
            chipped
        );
    }
    log::debug!(
        "chipped {} points into {} tiles of {}x{} in {:?}",
        chipped,
        num_tiles,
        layout.tile_len,
        layout.tile_len,
        start.elapsed()
    );
    Ok(ChippedCloud::new(store, layout))
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use pcd_core::pointcloud::{image::PointImage, point::is_valid_cartesian};
    use pcd_parser::{
        csv_conv::CsvConv,
        reader::{open_point_reader, CsvPointReader},
    };
    use projection_transform::{cartesian::cartesian_to_geodetic, Datum, Projection};

    use super::*;

    fn csv_reader(points: &[Point], format: &str, georef: Option<GeoReference>) -> (tempfile::NamedTempFile, CsvPointReader) {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        for p in points {
            writeln!(file, "{},{},{}", p.x, p.y, p.z).unwrap();
        }
        file.flush().unwrap();
        let conv = CsvConv::from_format(format, "").unwrap();
        let reader = CsvPointReader::new(file.path(), conv, georef).unwrap();
        (file, reader)
    }

    fn grid_points(n: usize) -> Vec<Point> {
        (0..n)
            .map(|i| Point::new((i % 13) as f64 + 1.0, (i / 13) as f64 + 1.0, i as f64))
            .collect()
    }

    #[test]
    fn layout_rounds_to_blocks() {
        let layout = ChipLayout::new(1000, 30, 16, 8).unwrap();
        assert_eq!((layout.rows, layout.cols), (32, 32));
        assert_eq!(layout.num_tiles(), 4);
        assert_eq!(layout.tile_rect(3), PixelRect::new(16, 16, 16, 16));

        let layout = ChipLayout::new(10, 0, 16, 8).unwrap();
        assert_eq!((layout.rows, layout.cols), (8, 8));
        assert_eq!(layout.tile_rect(0), PixelRect::new(0, 0, 8, 8));

        let layout = ChipLayout::new(1000, 8, 16, 8).unwrap();
        assert_eq!(layout.cols, 128);
        assert_eq!(layout.tiles_in(&PixelRect::new(15, 0, 2, 1)).len(), 2);

        assert!(ChipLayout::new(10, 10, 12, 8).is_err());
    }

    #[test]
    fn tiles_must_be_requested_in_order() {
        let points = grid_points(40);
        let (_file, reader) = csv_reader(&points, "1:x 2:y 3:z", None);
        let layout = ChipLayout::new(40, 8, 4, 4).unwrap();
        let mut image = ChipImage::new(reader, layout);
        assert!(matches!(
            image.tile(1),
            Err(ChipperError::OutOfOrder { requested: 1, expected: 0 })
        ));
        assert!(image.tile(0).is_ok());
        assert!(matches!(image.tile(0), Err(ChipperError::OutOfOrder { .. })));
        assert!(image.tile(1).is_ok());
    }

    #[test]
    fn chipped_cloud_holds_every_point() {
        let points = grid_points(100);
        let (_file, reader) = csv_reader(&points, "1:x 2:y 3:z", None);
        let layout = ChipLayout::new(100, 8, 8, 4).unwrap();
        let cloud = chip_point_source(reader, layout, TileStore::new().unwrap()).unwrap();
        assert_eq!((cloud.width(), cloud.height()), (layout.cols, layout.rows));

        let block = cloud.read_block(cloud.bounds()).unwrap();
        let mut chipped: Vec<Point> = block.points().filter(is_valid_cartesian).collect();
        let mut expected = points.clone();
        for list in [&mut chipped, &mut expected] {
            list.sort_by(|a, b| a.z.total_cmp(&b.z));
        }
        assert_eq!(chipped, expected);
    }

    #[test]
    fn geodetic_sources_become_cartesian() {
        let points = vec![Point::new(10.0, 20.0, 100.0), Point::new(10.5, 20.5, 50.0)];
        let georef = GeoReference::new(Datum::wgs84(), Projection::Geographic);
        let (_file, reader) = csv_reader(&points, "1:lon 2:lat 3:height_above_datum", Some(georef));
        let layout = ChipLayout::new(2, 1, 4, 4).unwrap();
        let mut image = ChipImage::new(reader, layout);
        let block = image.tile(0).unwrap();

        let llh: Vec<Point> = block
            .points()
            .filter(is_valid_cartesian)
            .map(|p| cartesian_to_geodetic(&Datum::wgs84(), &p))
            .collect();
        assert_eq!(llh.len(), 2);
        for original in &points {
            assert!(llh.iter().any(|p| (p - original).norm() < 1e-6));
        }
    }

    #[test]
    fn origin_of_a_geodetic_source_is_kept() {
        let points = vec![Point::new(0.0, 0.0, 0.0), Point::new(1.0, 1.0, 5.0)];
        let georef = GeoReference::new(Datum::wgs84(), Projection::Geographic);
        let (_file, reader) = csv_reader(&points, "1:lon 2:lat 3:height_above_datum", Some(georef));
        let layout = ChipLayout::new(2, 1, 4, 4).unwrap();
        let mut image = ChipImage::new(reader, layout);
        let block = image.tile(0).unwrap();

        let valid: Vec<Point> = block.points().filter(is_valid_cartesian).collect();
        assert_eq!(valid.len(), 2);
        let a = Datum::wgs84().semi_major_axis;
        assert!(valid.iter().any(|p| (p - Point::new(a, 0.0, 0.0)).norm() < 1e-6));
        // Empty cells are cartesian no-data, not NaN.
        assert!(block.points().all(|p| !p.z.is_nan()));
    }

    #[test]
    fn las_sources_are_chipped_from_the_calling_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.las");
        let points = grid_points(50);
        let mut writer = las::Writer::from_path(&path, las::Builder::from((1, 2)).into_header().unwrap()).unwrap();
        for p in &points {
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

        let reader = open_point_reader(&path, &CsvConv::new(), None).unwrap();
        let layout = ChipLayout::new(reader.num_points(), 8, 8, 4).unwrap();
        let cloud = chip_point_source(reader, layout, TileStore::new().unwrap()).unwrap();

        let block = cloud.read_block(cloud.bounds()).unwrap();
        let mut chipped: Vec<Point> = block.points().filter(is_valid_cartesian).collect();
        chipped.sort_by(|a, b| a.z.total_cmp(&b.z));
        assert_eq!(chipped.len(), points.len());
        for (a, b) in chipped.iter().zip(&points) {
            assert!((a - b).norm() < 1e-3, "{} vs {}", a, b);
        }
    }
}
