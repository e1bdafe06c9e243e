use pcd_core::pointcloud::{
    block::{PixelRect, PointBlock},
    cache::BlockCache,
    image::PointImage,
};
use pcd_parser::raster::RasterCloud;

use crate::{chip_image::ChipLayout, error::ChipperError, store::TileStore};

const TILE_CACHE_SIZE: usize = 8;

/// Point-cloud image assembled from the chips of a LAS or CSV source.
pub struct ChippedCloud {
    store: TileStore,
    layout: ChipLayout,
    cache: BlockCache<PointBlock>,
}

impl ChippedCloud {
    pub fn new(store: TileStore, layout: ChipLayout) -> Self {
        Self {
            store,
            layout,
            cache: BlockCache::new(TILE_CACHE_SIZE),
        }
    }

    pub fn layout(&self) -> &ChipLayout {
        &self.layout
    }
}

impl PointImage for ChippedCloud {
    type Error = ChipperError;

    fn width(&self) -> usize {
        self.layout.cols
    }

    fn height(&self) -> usize {
        self.layout.rows
    }

    fn num_channels(&self) -> usize {
        3
    }

    fn read_block(&self, rect: PixelRect) -> Result<PointBlock, ChipperError> {
        let mut block = PointBlock::new(rect, 3);
        for (index, tile_rect) in self.layout.tiles_in(&rect) {
            let tile = self
                .cache
                .get_or_load(index, || self.store.read_tile(index, tile_rect, 3))?;
            block.copy_from(&tile);
        }
        Ok(block)
    }
}

/// One input of the composite point-cloud image.
pub enum CloudSource {
    Raster(RasterCloud),
    Chipped(ChippedCloud),
}

impl PointImage for CloudSource {
    type Error = ChipperError;

    fn width(&self) -> usize {
        match self {
            CloudSource::Raster(cloud) => cloud.width(),
            CloudSource::Chipped(cloud) => PointImage::width(cloud),
        }
    }

    fn height(&self) -> usize {
        match self {
            CloudSource::Raster(cloud) => cloud.height(),
            CloudSource::Chipped(cloud) => PointImage::height(cloud),
        }
    }

    fn num_channels(&self) -> usize {
        match self {
            CloudSource::Raster(cloud) => cloud.num_channels(),
            CloudSource::Chipped(cloud) => PointImage::num_channels(cloud),
        }
    }

    fn read_block(&self, rect: PixelRect) -> Result<PointBlock, ChipperError> {
        match self {
            CloudSource::Raster(cloud) => Ok(cloud.read_block(rect)?),
            CloudSource::Chipped(cloud) => PointImage::read_block(cloud, rect),
        }
    }
}

/// Sources placed left to right in a single image as tall as the tallest
/// one. Space below shorter sources is no-data.
pub struct CompositeCloud {
    sources: Vec<CloudSource>,
    offsets: Vec<usize>,
    width: usize,
    height: usize,
    channels: usize,
}

impl CompositeCloud {
    pub fn new(sources: Vec<CloudSource>) -> Result<Self, ChipperError> {
        if sources.is_empty() {
            return Err(ChipperError::NoSources);
        }

        let mut offsets = Vec::with_capacity(sources.len());
        let mut width = 0;
        for source in &sources {
            offsets.push(width);
            width += source.width();
        }
        let height = sources.iter().map(|s| s.height()).max().unwrap_or(0);

        let channels = sources[0].num_channels();
        let channels = if sources.iter().all(|s| s.num_channels() == channels) {
            channels
        } else {
            log::warn!("input clouds have different numbers of channels, errors are ignored");
            3
        };

        Ok(Self {
            sources,
            offsets,
            width,
            height,
            channels,
        })
    }

    pub fn sources(&self) -> &[CloudSource] {
        &self.sources
    }
}

impl PointImage for CompositeCloud {
    type Error = ChipperError;

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn read_block(&self, rect: PixelRect) -> Result<PointBlock, ChipperError> {
        let mut block = PointBlock::new(rect, self.channels);
        for (source, &offset) in self.sources.iter().zip(&self.offsets) {
            let extent = PixelRect::new(offset, 0, source.width(), source.height());
            let Some(overlap) = rect.intersection(&extent) else {
                continue;
            };
            let local = PixelRect::new(overlap.col - offset, overlap.row, overlap.width, overlap.height);
            let mut part = source.read_block(local)?.truncate_channels(self.channels);
            part.rect = overlap;
            block.copy_from(&part);
        }
        Ok(block)
    }
}
