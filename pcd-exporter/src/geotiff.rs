use std::{
    fs::File,
    io::{BufWriter, Seek, Write},
    path::Path,
};

use pcd_core::pointcloud::block::PixelRect;
use projection_transform::{Datum, GeoReference, Projection};
use tiff::{
    encoder::{colortype, colortype::ColorType, TiffEncoder, TiffValue},
    tags::Tag,
};

use crate::{
    error::ExportError,
    sink::{RasterMetadata, RasterSink, SampleFormat},
};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

/// Tag for `code`, resolving to the named variant when the tiff crate knows it.
fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GT_CITATION: u16 = 1026;
const GEOGRAPHIC_TYPE: u16 = 2048;
const GEOG_SEMI_MAJOR_AXIS: u16 = 2057;
const GEOG_SEMI_MINOR_AXIS: u16 = 2058;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

/// GeoTIFF key directory with its double and ASCII parameter blocks.
#[derive(Debug, Default, PartialEq)]
struct GeoKeys {
    keys: Vec<[u16; 4]>,
    doubles: Vec<f64>,
    ascii: String,
}

impl GeoKeys {
    fn short(&mut self, key: u16, value: u16) {
        self.keys.push([key, 0, 1, value]);
    }

    fn double(&mut self, key: u16, value: f64) {
        self.keys.push([key, GEO_DOUBLE_PARAMS, 1, self.doubles.len() as u16]);
        self.doubles.push(value);
    }

    fn text(&mut self, key: u16, value: &str) {
        let value = format!("{}|", value);
        self.keys.push([key, GEO_ASCII_PARAMS, value.len() as u16, self.ascii.len() as u16]);
        self.ascii.push_str(&value);
    }

    fn from_georef(georef: &GeoReference) -> Self {
        let mut keys = GeoKeys::default();
        let wgs84 = georef.datum.semi_major_axis == Datum::wgs84().semi_major_axis
            && georef.datum.semi_minor_axis == Datum::wgs84().semi_minor_axis;

        match &georef.projection {
            Projection::Geographic => {
                keys.short(GT_MODEL_TYPE, MODEL_TYPE_GEOGRAPHIC);
                keys.short(GT_RASTER_TYPE, RASTER_PIXEL_IS_AREA);
                if wgs84 {
                    keys.short(GEOGRAPHIC_TYPE, 4326);
                } else {
                    keys.text(GT_CITATION, &georef.to_proj_string());
                    keys.short(GEOGRAPHIC_TYPE, USER_DEFINED);
                    keys.double(GEOG_SEMI_MAJOR_AXIS, georef.datum.semi_major_axis);
                    keys.double(GEOG_SEMI_MINOR_AXIS, georef.datum.semi_minor_axis);
                }
            }
            Projection::Utm { zone, north } if wgs84 => {
                keys.short(GT_MODEL_TYPE, MODEL_TYPE_PROJECTED);
                keys.short(GT_RASTER_TYPE, RASTER_PIXEL_IS_AREA);
                keys.short(PROJECTED_CS_TYPE, (if *north { 32600 } else { 32700 }) + *zone as u16);
            }
            _ => {
                keys.short(GT_MODEL_TYPE, MODEL_TYPE_PROJECTED);
                keys.short(GT_RASTER_TYPE, RASTER_PIXEL_IS_AREA);
                keys.text(GT_CITATION, &georef.to_proj_string());
                keys.short(PROJECTED_CS_TYPE, USER_DEFINED);
            }
        }
        keys.keys.sort_by_key(|k| k[0]);
        keys
    }

    /// Header followed by the sorted key entries.
    fn directory(&self) -> Vec<u16> {
        let mut directory = vec![1, 1, 0, self.keys.len() as u16];
        directory.extend(self.keys.iter().flatten());
        directory
    }
}

/// Writes rasters as striped GeoTIFF files with pixel-as-area georeferencing
/// and a GDAL no-data tag.
#[derive(Debug, Clone)]
pub struct GeoTiffWriter {
    rows_per_strip: usize,
}

impl Default for GeoTiffWriter {
    fn default() -> Self {
        Self { rows_per_strip: 256 }
    }
}

impl GeoTiffWriter {
    pub fn new(rows_per_strip: usize) -> Self {
        Self {
            rows_per_strip: rows_per_strip.max(1),
        }
    }

    fn write_image<W, C>(
        &self,
        encoder: &mut TiffEncoder<W>,
        metadata: &RasterMetadata,
        tile: &dyn Fn(PixelRect) -> Vec<f32>,
        convert: impl Fn(f32) -> C::Inner,
    ) -> Result<(), ExportError>
    where
        W: Write + Seek,
        C: ColorType,
        [C::Inner]: TiffValue,
    {
        let mut image = encoder.new_image::<C>(metadata.width as u32, metadata.height as u32)?;

        if let Some(georef) = &metadata.georef {
            let t = georef.transform;
            let scale = [t.pixel_width, -t.pixel_height, 0.0];
            let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
            let keys = GeoKeys::from_georef(georef);

            let directory = image.encoder();
            directory.write_tag(geo_tag(MODEL_PIXEL_SCALE), &scale[..])?;
            directory.write_tag(geo_tag(MODEL_TIEPOINT), &tiepoint[..])?;
            directory.write_tag(geo_tag(GEO_KEY_DIRECTORY), &keys.directory()[..])?;
            if !keys.doubles.is_empty() {
                directory.write_tag(geo_tag(GEO_DOUBLE_PARAMS), &keys.doubles[..])?;
            }
            if !keys.ascii.is_empty() {
                directory.write_tag(geo_tag(GEO_ASCII_PARAMS), keys.ascii.as_str())?;
            }
        }
        if let Some(nodata) = metadata.nodata {
            image
                .encoder()
                .write_tag(geo_tag(GDAL_NODATA), format!("{}", nodata).as_str())?;
        }

        image.rows_per_strip(self.rows_per_strip as u32)?;
        for row in (0..metadata.height).step_by(self.rows_per_strip) {
            let rect = PixelRect::new(0, row, metadata.width, self.rows_per_strip.min(metadata.height - row));
            let values = tile(rect);
            let expected = rect.area() * metadata.channels;
            if values.len() != expected {
                return Err(ExportError::TileSize {
                    expected,
                    actual: values.len(),
                });
            }
            let samples: Vec<C::Inner> = values.into_iter().map(&convert).collect();
            image.write_strip(&samples)?;
        }
        image.finish()?;
        Ok(())
    }
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

impl RasterSink for GeoTiffWriter {
    fn write(
        &mut self,
        path: &Path,
        metadata: &RasterMetadata,
        tile: &dyn Fn(PixelRect) -> Vec<f32>,
    ) -> Result<(), ExportError> {
        if ![1, 3, 4].contains(&metadata.channels) {
            return Err(ExportError::UnsupportedChannels(metadata.channels));
        }
        let file = File::create(path)?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;

        match (metadata.format, metadata.channels) {
            (SampleFormat::Float32, 1) => {
                self.write_image::<_, colortype::Gray32Float>(&mut encoder, metadata, tile, |v| v)
            }
            (SampleFormat::Float32, 3) => {
                self.write_image::<_, colortype::RGB32Float>(&mut encoder, metadata, tile, |v| v)
            }
            (SampleFormat::Float32, 4) => {
                self.write_image::<_, colortype::RGBA32Float>(&mut encoder, metadata, tile, |v| v)
            }
            (SampleFormat::UInt8, 1) => self.write_image::<_, colortype::Gray8>(&mut encoder, metadata, tile, to_u8),
            (SampleFormat::UInt8, 3) => self.write_image::<_, colortype::RGB8>(&mut encoder, metadata, tile, to_u8),
            (SampleFormat::UInt8, 4) => self.write_image::<_, colortype::RGBA8>(&mut encoder, metadata, tile, to_u8),
            (_, channels) => Err(ExportError::UnsupportedChannels(channels)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;

    use pcd_rasterizer::Raster;
    use projection_transform::GeoTransform;
    use tiff::decoder::{Decoder, DecodingResult};

    use super::*;
    use crate::sink::write_raster;

    #[test]
    fn keys_for_common_systems() {
        let geographic = GeoKeys::from_georef(&GeoReference::new(Datum::wgs84(), Projection::Geographic));
        assert!(geographic.keys.contains(&[GEOGRAPHIC_TYPE, 0, 1, 4326]));
        assert!(geographic.ascii.is_empty());

        let utm = GeoKeys::from_georef(&GeoReference::new(Datum::wgs84(), Projection::Utm { zone: 10, north: false }));
        assert!(utm.keys.contains(&[PROJECTED_CS_TYPE, 0, 1, 32710]));

        let moon = GeoKeys::from_georef(&GeoReference::new(Datum::moon(), Projection::Geographic));
        assert_eq!(moon.doubles, vec![1737400.0, 1737400.0]);
        assert!(moon.ascii.ends_with('|'));
        let directory = moon.directory();
        assert_eq!(directory[3] as usize, moon.keys.len());
        assert_eq!(directory.len(), 4 + 4 * moon.keys.len());
    }

    #[test]
    fn dem_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out-DEM.tif");

        let mut raster = Raster::new(3, 5, 1, -32768.0);
        for (i, v) in raster.data.iter_mut().enumerate() {
            *v = i as f32;
        }
        let mut georef = GeoReference::new(Datum::wgs84(), Projection::Geographic);
        georef.set_transform(GeoTransform {
            origin_x: 10.0,
            origin_y: 20.0,
            pixel_width: 0.5,
            pixel_height: -0.5,
        });

        let mut writer = GeoTiffWriter::new(2);
        write_raster(&mut writer, &path, &raster, SampleFormat::Float32, Some(&georef)).unwrap();

        let mut decoder = Decoder::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (3, 5));
        let scale = decoder.get_tag_f64_vec(geo_tag(MODEL_PIXEL_SCALE)).unwrap();
        assert_eq!(scale, vec![0.5, 0.5, 0.0]);
        let tiepoint = decoder.get_tag_f64_vec(geo_tag(MODEL_TIEPOINT)).unwrap();
        assert_eq!(tiepoint[3..5], [10.0, 20.0]);
        let nodata = decoder.get_tag_ascii_string(geo_tag(GDAL_NODATA)).unwrap();
        assert_eq!(nodata.trim_end_matches('\0'), "-32768");
        match decoder.read_image().unwrap() {
            DecodingResult::F32(values) => assert_eq!(values, raster.data),
            _ => panic!("expected f32 samples"),
        }
    }

    #[test]
    fn rgba_images_keep_their_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out-DRG.tif");
        let mut gray = Raster::new(2, 2, 1, -1.0);
        gray.data = vec![0.25, -1.0, 0.75, 1.0];
        let rgba = gray.with_alpha().unwrap();

        write_raster(&mut GeoTiffWriter::default(), &path, &rgba, SampleFormat::Float32, None).unwrap();
        let mut decoder = Decoder::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(decoder.colortype().unwrap(), tiff::ColorType::RGBA(32));
        match decoder.read_image().unwrap() {
            DecodingResult::F32(values) => assert_eq!(values, rgba.data),
            _ => panic!("expected f32 samples"),
        }
    }

    #[test]
    fn bytes_are_clamped_and_bad_channel_counts_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normalized.tif");
        let mut raster = Raster::new(2, 1, 1, 0.0);
        raster.data = vec![300.0, 12.4];

        let mut writer = GeoTiffWriter::default();
        write_raster(&mut writer, &path, &raster, SampleFormat::UInt8, None).unwrap();
        let mut decoder = Decoder::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        match decoder.read_image().unwrap() {
            DecodingResult::U8(values) => assert_eq!(values, vec![255, 12]),
            _ => panic!("expected u8 samples"),
        }

        let two = Raster::new(1, 1, 2, 0.0);
        assert!(matches!(
            write_raster(&mut writer, &path, &two, SampleFormat::Float32, None),
            Err(ExportError::UnsupportedChannels(2))
        ));
    }
}
