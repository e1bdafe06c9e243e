use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Mutex,
};

use pcd_core::pointcloud::{
    block::{PixelRect, PointBlock},
    cache::BlockCache,
    image::PointImage,
};
use tiff::{
    decoder::{ChunkType, Decoder, DecodingResult},
    tags::Tag,
};

use crate::error::ReaderError;

const CHUNK_CACHE_SIZE: usize = 64;

fn to_f64(result: DecodingResult) -> Option<Vec<f64>> {
    let values = match result {
        DecodingResult::F64(v) => v,
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(values)
}

fn invalid(path: &Path, reason: &str) -> ReaderError {
    ReaderError::InvalidRaster {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Where the uncompressed chunks of an image the decoder cannot interpret
/// lie in the file. Six channel clouds, points followed by an error
/// vector, are stored this way.
#[derive(Debug, Clone)]
struct RawChunks {
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    bytes_per_sample: usize,
    float: bool,
    big_endian: bool,
}

impl RawChunks {
    fn from_decoder(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<Self, ReaderError> {
        if decoder.find_tag_unsigned::<u16>(Tag::Compression)?.unwrap_or(1) != 1 {
            return Err(invalid(path, "compressed images need 1, 3 or 4 samples per pixel"));
        }
        if decoder.find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?.unwrap_or(1) != 1 {
            return Err(invalid(path, "planar images need 1, 3 or 4 samples per pixel"));
        }
        let bits = decoder
            .find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)?
            .and_then(|b| b.first().copied())
            .unwrap_or(1);
        let float = decoder
            .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?
            .and_then(|f| f.first().copied())
            == Some(3);
        let bytes_per_sample = match (bits, float) {
            (32, true) => 4,
            (64, true) => 8,
            (8, false) => 1,
            (16, false) => 2,
            _ => return Err(invalid(path, &format!("unsupported {} bit samples", bits))),
        };

        let (offsets, byte_counts) = match decoder.get_chunk_type() {
            ChunkType::Strip => (Tag::StripOffsets, Tag::StripByteCounts),
            ChunkType::Tile => (Tag::TileOffsets, Tag::TileByteCounts),
        };
        let offsets = decoder.get_tag_u64_vec(offsets)?;
        let byte_counts = decoder.get_tag_u64_vec(byte_counts)?;

        let mut order = [0u8; 2];
        File::open(path)?.read_exact(&mut order)?;
        Ok(Self {
            offsets,
            byte_counts,
            bytes_per_sample,
            float,
            big_endian: &order == b"MM",
        })
    }

    fn sample(&self, bytes: &[u8]) -> f64 {
        let mut le = [0u8; 8];
        le[..bytes.len()].copy_from_slice(bytes);
        if self.big_endian {
            le[..bytes.len()].reverse();
        }
        match (bytes.len(), self.float) {
            (4, true) => f64::from(f32::from_le_bytes([le[0], le[1], le[2], le[3]])),
            (8, true) => f64::from_le_bytes(le),
            (2, false) => f64::from(u16::from_le_bytes([le[0], le[1]])),
            _ => f64::from(le[0]),
        }
    }

    fn read(&self, path: &Path, index: usize) -> Result<Vec<f64>, ReaderError> {
        let (offset, len) = match (self.offsets.get(index), self.byte_counts.get(index)) {
            (Some(offset), Some(len)) => (*offset, *len as usize),
            _ => return Err(invalid(path, &format!("no chunk {}", index))),
        };
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        Ok(bytes
            .chunks_exact(self.bytes_per_sample)
            .map(|b| self.sample(b))
            .collect())
    }
}

/// Decoded strip or tile: `width` x `height` pixels, rows `stride` values apart.
struct Chunk {
    width: usize,
    height: usize,
    stride: usize,
    values: Vec<f64>,
}

/// Multi-channel TIFF image read lazily one strip or tile at a time.
/// Used for point clouds (3, 4 or 6 channels) and for single band textures.
/// Decoders are pooled: a thread loading a chunk takes an idle decoder, or
/// opens another one, so worker threads decode in parallel.
pub struct RasterCloud {
    pub path: PathBuf,
    width: usize,
    height: usize,
    channels: usize,
    chunk_width: usize,
    chunk_height: usize,
    decoders: Mutex<Vec<Decoder<BufReader<File>>>>,
    raw: Option<RawChunks>,
    cache: BlockCache<Chunk>,
}

impl RasterCloud {
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
        let (width, height) = decoder.dimensions()?;
        let channels = match decoder.find_tag(Tag::SamplesPerPixel)? {
            Some(value) => value.into_u32()? as usize,
            None => 1,
        };
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        if chunk_width == 0 || chunk_height == 0 {
            return Err(invalid(path, "empty strip or tile size"));
        }
        let raw = match decoder.colortype() {
            Ok(_) => None,
            Err(_) => Some(RawChunks::from_decoder(&mut decoder, path)?),
        };
        log::debug!(
            "{}: {}x{} with {} channels, chunks of {}x{}",
            path.display(),
            width,
            height,
            channels,
            chunk_width,
            chunk_height
        );

        Ok(Self {
            path: path.to_path_buf(),
            width: width as usize,
            height: height as usize,
            channels,
            chunk_width: chunk_width as usize,
            chunk_height: chunk_height as usize,
            decoders: Mutex::new(vec![decoder]),
            raw,
            cache: BlockCache::new(CHUNK_CACHE_SIZE),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_channels(&self) -> usize {
        self.channels
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }

    fn chunks_across(&self) -> usize {
        self.width.div_ceil(self.chunk_width)
    }

    fn take_decoder(&self) -> Result<Decoder<BufReader<File>>, ReaderError> {
        let idle = self.decoders.lock().unwrap_or_else(|e| e.into_inner()).pop();
        match idle {
            Some(decoder) => Ok(decoder),
            None => Ok(Decoder::new(BufReader::new(File::open(&self.path)?))?),
        }
    }

    fn release_decoder(&self, decoder: Decoder<BufReader<File>>) {
        self.decoders.lock().unwrap_or_else(|e| e.into_inner()).push(decoder);
    }

    #[cfg(test)]
    fn idle_decoders(&self) -> usize {
        self.decoders.lock().map(|d| d.len()).unwrap_or(0)
    }

    fn load_chunk(&self, index: usize) -> Result<Chunk, ReaderError> {
        let mut decoder = self.take_decoder()?;
        let (width, height) = decoder.chunk_data_dimensions(index as u32);
        let values = match &self.raw {
            Some(raw) => {
                self.release_decoder(decoder);
                raw.read(&self.path, index)?
            }
            None => {
                // A decoder that failed mid-read is dropped rather than reused.
                let result = decoder.read_chunk(index as u32)?;
                self.release_decoder(decoder);
                to_f64(result).ok_or_else(|| invalid(&self.path, "unsupported sample format"))?
            }
        };

        let (width, height) = (width as usize, height as usize);
        let row_values = values.len() / height.max(1);
        if row_values < width * self.channels {
            return Err(ReaderError::InvalidRaster {
                path: self.path.display().to_string(),
                reason: format!("chunk {} is smaller than {}x{}", index, width, height),
            });
        }
        Ok(Chunk {
            width,
            height,
            stride: row_values,
            values,
        })
    }

    /// Reads `rect`, which may extend past the image; pixels outside are
    /// zero, the no-data value of cartesian clouds.
    pub fn read_block(&self, rect: PixelRect) -> Result<PointBlock, ReaderError> {
        let mut block = PointBlock::new(rect, self.channels);
        let Some(inside) = rect.intersection(&self.bounds()) else {
            return Ok(block);
        };

        let first_chunk_col = inside.col / self.chunk_width;
        let last_chunk_col = (inside.right() - 1) / self.chunk_width;
        let first_chunk_row = inside.row / self.chunk_height;
        let last_chunk_row = (inside.bottom() - 1) / self.chunk_height;

        for chunk_row in first_chunk_row..=last_chunk_row {
            for chunk_col in first_chunk_col..=last_chunk_col {
                let index = chunk_row * self.chunks_across() + chunk_col;
                let chunk = self.cache.get_or_load(index, || self.load_chunk(index))?;
                let chunk_rect = PixelRect::new(
                    chunk_col * self.chunk_width,
                    chunk_row * self.chunk_height,
                    chunk.width,
                    chunk.height,
                );
                let Some(overlap) = chunk_rect.intersection(&inside) else {
                    continue;
                };
                for row in overlap.row..overlap.bottom() {
                    let src_row = (row - chunk_rect.row) * chunk.stride;
                    for col in overlap.col..overlap.right() {
                        let src = src_row + (col - chunk_rect.col) * self.channels;
                        block
                            .pixel_mut(col - rect.col, row - rect.row)
                            .copy_from_slice(&chunk.values[src..src + self.channels]);
                    }
                }
            }
        }
        Ok(block)
    }
}

impl PointImage for RasterCloud {
    type Error = ReaderError;

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn read_block(&self, rect: PixelRect) -> Result<PointBlock, ReaderError> {
        RasterCloud::read_block(self, rect)
    }
}

#[cfg(test)]
mod tests {
    use tiff::{
        encoder::{colortype, TiffEncoder},
        tags::{PhotometricInterpretation, SampleFormat},
    };

    use super::*;

    struct ErrorVectorCloud;

    impl colortype::ColorType for ErrorVectorCloud {
        type Inner = f32;
        const TIFF_VALUE: PhotometricInterpretation = PhotometricInterpretation::RGB;
        const BITS_PER_SAMPLE: &'static [u16] = &[32, 32, 32, 32, 32, 32];
        const SAMPLE_FORMAT: &'static [SampleFormat] = &[
            SampleFormat::IEEEFP,
            SampleFormat::IEEEFP,
            SampleFormat::IEEEFP,
            SampleFormat::IEEEFP,
            SampleFormat::IEEEFP,
            SampleFormat::IEEEFP,
        ];
    }

    fn write_rgb_cloud(width: u32, height: u32, rows_per_strip: u32) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".tif").tempfile().unwrap();
        let mut encoder = TiffEncoder::new(File::create(file.path()).unwrap()).unwrap();
        let mut image = encoder.new_image::<colortype::RGB32Float>(width, height).unwrap();
        image.rows_per_strip(rows_per_strip).unwrap();
        let mut row = 0u32;
        while image.next_strip_sample_count() > 0 {
            let n = image.next_strip_sample_count() as usize / 3;
            let strip: Vec<f32> = (0..n)
                .flat_map(|i| {
                    let r = row + (i as u32) / width;
                    let c = (i as u32) % width;
                    [c as f32, r as f32, 100.0 + (r * width + c) as f32]
                })
                .collect();
            image.write_strip(&strip).unwrap();
            row += (n as u32) / width;
        }
        image.finish().unwrap();
        file
    }

    #[test]
    fn reads_blocks_across_strips() {
        let file = write_rgb_cloud(5, 7, 2);
        let cloud = RasterCloud::open(file.path()).unwrap();
        assert_eq!((cloud.width(), cloud.height(), cloud.num_channels()), (5, 7, 3));

        let block = cloud.read_block(PixelRect::new(1, 1, 3, 4)).unwrap();
        for row in 0..4 {
            for col in 0..3 {
                let (c, r) = (col + 1, row + 1);
                assert_eq!(block.pixel(col, row), &[c as f64, r as f64, 100.0 + (r * 5 + c) as f64]);
            }
        }
    }

    #[test]
    fn outside_pixels_are_nodata() {
        let file = write_rgb_cloud(4, 4, 4);
        let cloud = RasterCloud::open(file.path()).unwrap();
        let block = cloud.read_block(PixelRect::new(3, 3, 2, 2)).unwrap();
        assert_eq!(block.point(0, 0).z, 115.0);
        assert_eq!(block.point(1, 1), pcd_core::pointcloud::point::Point::zeros());
    }

    #[test]
    fn threads_decode_with_their_own_decoders() {
        let file = write_rgb_cloud(6, 40, 2);
        let cloud = RasterCloud::open(file.path()).unwrap();
        let expected: Vec<PointBlock> = (0..4)
            .map(|i| RasterCloud::open(file.path()).unwrap().read_block(PixelRect::new(0, i * 10, 6, 10)).unwrap())
            .collect();

        let blocks: Vec<PointBlock> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let cloud = &cloud;
                    scope.spawn(move || cloud.read_block(PixelRect::new(0, i * 10, 6, 10)).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(blocks, expected);
        assert!(cloud.idle_decoders() >= 1);
    }

    #[test]
    fn six_channel_clouds_are_read_from_raw_strips() {
        let file = tempfile::Builder::new().suffix(".tif").tempfile().unwrap();
        let values: Vec<f32> = (0..3 * 2 * 6).map(|v| v as f32 * 0.5).collect();
        let mut encoder = TiffEncoder::new(File::create(file.path()).unwrap()).unwrap();
        encoder.new_image::<ErrorVectorCloud>(3, 2).unwrap().write_data(&values).unwrap();

        let cloud = RasterCloud::open(file.path()).unwrap();
        assert_eq!(cloud.num_channels(), 6);
        let block = cloud.read_block(PixelRect::new(0, 0, 3, 2)).unwrap();
        assert_eq!(block.data, values.iter().map(|v| f64::from(*v)).collect::<Vec<_>>());

        let corner = cloud.read_block(PixelRect::new(2, 1, 2, 1)).unwrap();
        assert_eq!(corner.data[..6], values[30..].iter().map(|v| f64::from(*v)).collect::<Vec<_>>()[..]);
        assert!(corner.data[6..].iter().all(|v| *v == 0.0));
    }
}
