use std::{
    fs::{self, File},
    io::{BufWriter, Read as _, Write as _},
    path::{Path, PathBuf},
};

use pcd_core::pointcloud::block::{PixelRect, PointBlock};
use tempfile::TempDir;

use crate::error::ChipperError;

/// Chipped tiles persisted as raw f64 values in a temporary directory.
/// The directory and its files are removed when the store is dropped.
pub struct TileStore {
    dir: TempDir,
}

impl TileStore {
    pub fn new() -> Result<Self, ChipperError> {
        let dir = tempfile::Builder::new().prefix("chips-").tempdir()?;
        Ok(Self { dir })
    }

    /// A store below `parent` instead of the system temporary directory.
    pub fn new_in(parent: &Path) -> Result<Self, ChipperError> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("chips-").tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn tile_path(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("{}.bin", index))
    }

    pub fn write_tile(&self, index: usize, block: &PointBlock) -> Result<(), ChipperError> {
        let mut writer = BufWriter::new(File::create(self.tile_path(index))?);
        writer.write_all(bytemuck::cast_slice(&block.data))?;
        writer.flush()?;
        Ok(())
    }

    /// Reads tile `index`, which must have been written with `rect` and
    /// `channels`.
    pub fn read_tile(&self, index: usize, rect: PixelRect, channels: usize) -> Result<PointBlock, ChipperError> {
        let mut block = PointBlock::new(rect, channels);
        let path = self.tile_path(index);
        let stored = fs::metadata(&path)?.len() as usize;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut block.data);
        if stored != bytes.len() {
            return Err(ChipperError::SizeMismatch {
                expected: bytes.len(),
                actual: stored,
            });
        }
        File::open(&path)?.read_exact(bytes)?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::point::Point;

    use super::*;

    #[test]
    fn tiles_survive_a_round_trip() {
        let store = TileStore::new().unwrap();
        let rect = PixelRect::new(4, 0, 2, 2);
        let mut block = PointBlock::new(rect, 3);
        block.set_point(1, 0, &Point::new(-1.5, 2.25, 1e9));
        store.write_tile(1, &block).unwrap();

        assert_eq!(store.read_tile(1, rect, 3).unwrap(), block);
        assert!(matches!(
            store.read_tile(1, PixelRect::new(0, 0, 4, 4), 3),
            Err(ChipperError::SizeMismatch { .. })
        ));
        assert!(matches!(store.read_tile(2, rect, 3), Err(ChipperError::Io(_))));
    }

    #[test]
    fn directory_is_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let store = TileStore::new_in(parent.path()).unwrap();
        let path = store.path().to_path_buf();
        store.write_tile(0, &PointBlock::new(PixelRect::new(0, 0, 1, 1), 3)).unwrap();
        assert!(path.join("0.bin").exists());
        drop(store);
        assert!(!path.exists());
    }
}
