use pcd_core::pointcloud::block::PixelRect;

/// Output raster held in memory, `channels` interleaved f32 values per
/// pixel. Pixels equal to `nodata` (or NaN) carry no data.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub nodata: f32,
    pub data: Vec<f32>,
}

impl Raster {
    pub fn new(width: usize, height: usize, channels: usize, nodata: f32) -> Self {
        Self {
            width,
            height,
            channels,
            nodata,
            data: vec![nodata; width * height * channels],
        }
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }

    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    fn offset(&self, col: usize, row: usize) -> usize {
        (row * self.width + col) * self.channels
    }

    pub fn get(&self, col: usize, row: usize, channel: usize) -> f32 {
        self.data[self.offset(col, row) + channel]
    }

    pub fn set(&mut self, col: usize, row: usize, channel: usize, value: f32) {
        let offset = self.offset(col, row);
        self.data[offset + channel] = value;
    }

    pub fn is_valid_value(&self, value: f32) -> bool {
        value != self.nodata && !value.is_nan()
    }

    /// Whether the first channel of the pixel holds data.
    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        self.is_valid_value(self.get(col, row, 0))
    }

    pub fn valid_count(&self) -> usize {
        self.data
            .iter()
            .step_by(self.channels.max(1))
            .filter(|v| self.is_valid_value(**v))
            .count()
    }

    /// Copies single channel `values` laid out row-major over `rect`.
    pub fn write_tile(&mut self, rect: PixelRect, values: &[f32]) {
        for row in 0..rect.height {
            for col in 0..rect.width {
                self.set(rect.col + col, rect.row + row, 0, values[row * rect.width + col]);
            }
        }
    }

    /// All channels of `rect`, row-major.
    pub fn tile(&self, rect: PixelRect) -> Vec<f32> {
        let mut values = Vec::with_capacity(rect.area() * self.channels);
        for row in rect.row..rect.bottom() {
            let start = self.offset(rect.col, row);
            values.extend_from_slice(&self.data[start..start + rect.width * self.channels]);
        }
        values
    }

    /// Stacks single channel rasters of equal size into one raster. A pixel
    /// is no-data if any band is; with `absolute` values lose their sign.
    pub fn combine(bands: &[Raster], absolute: bool) -> Option<Raster> {
        let first = bands.first()?;
        if bands
            .iter()
            .any(|b| b.width != first.width || b.height != first.height || b.channels != 1)
        {
            return None;
        }

        let mut combined = Raster::new(first.width, first.height, bands.len(), first.nodata);
        for pixel in 0..first.num_pixels() {
            if bands.iter().any(|b| !b.is_valid_value(b.data[pixel])) {
                continue;
            }
            for (channel, band) in bands.iter().enumerate() {
                let value = band.data[pixel];
                combined.data[pixel * bands.len() + channel] = if absolute { value.abs() } else { value };
            }
        }
        Some(combined)
    }

    /// RGBA copy of a single channel raster: the value in the three color
    /// channels and an alpha of 1 where there is data, 0 elsewhere.
    pub fn with_alpha(&self) -> Option<Raster> {
        if self.channels != 1 {
            return None;
        }
        let mut rgba = Raster::new(self.width, self.height, 4, self.nodata);
        for (pixel, value) in self.data.iter().enumerate() {
            let alpha = if self.is_valid_value(*value) { 1.0 } else { 0.0 };
            rgba.data[pixel * 4..pixel * 4 + 4].copy_from_slice(&[*value, *value, *value, alpha]);
        }
        Some(rgba)
    }

    /// Applies `f` to every valid value.
    pub fn map_valid(&mut self, f: impl Fn(f32) -> f32) {
        let nodata = self.nodata;
        for value in self.data.iter_mut() {
            if *value != nodata && !value.is_nan() {
                *value = f(*value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_and_validity() {
        let mut raster = Raster::new(4, 3, 1, -1.0);
        raster.write_tile(PixelRect::new(1, 1, 2, 2), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(raster.get(2, 2, 0), 4.0);
        assert!(!raster.is_valid(0, 0));
        assert_eq!(raster.valid_count(), 4);
        assert_eq!(raster.tile(PixelRect::new(1, 2, 3, 1)), vec![3.0, 4.0, -1.0]);
    }

    #[test]
    fn combine_masks_and_takes_absolute_values() {
        let mut a = Raster::new(2, 1, 1, -9.0);
        let mut b = Raster::new(2, 1, 1, -9.0);
        a.data = vec![-1.0, 2.0];
        b.data = vec![3.0, -9.0];
        let combined = Raster::combine(&[a, b], true).unwrap();
        assert_eq!(combined.channels, 2);
        assert_eq!(combined.data, vec![1.0, 3.0, -9.0, -9.0]);
        assert!(Raster::combine(&[], true).is_none());
    }

    #[test]
    fn alpha_marks_pixels_with_data() {
        let mut gray = Raster::new(2, 1, 1, -9.0);
        gray.data = vec![0.5, -9.0];
        let rgba = gray.with_alpha().unwrap();
        assert_eq!(rgba.channels, 4);
        assert_eq!(rgba.data, vec![0.5, 0.5, 0.5, 1.0, -9.0, -9.0, -9.0, 0.0]);
        assert!(Raster::new(1, 1, 3, 0.0).with_alpha().is_none());
    }
}
