//! Normalisation and tile split/stitch for network input and output.

use common::Buffer2;

use crate::error::{Error, Result};

/// Flat images normalise to zero instead of dividing by zero.
pub const NORMALIZE_EPSILON: f64 = 1e-10;

/// Scales `image` to `[0, 1]` as `(v - min) / (max - min + epsilon)`.
pub fn normalize(image: &Buffer2<u16>) -> Buffer2<f32> {
    let (min, max) = image
        .pixels()
        .iter()
        .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if image.is_empty() {
        return Buffer2::new_default(image.width(), image.height());
    }

    let min = min as f64;
    let scale = 1.0 / (max as f64 - min + NORMALIZE_EPSILON);
    image.map(|v| ((v as f64 - min) * scale) as f32)
}

/// Grid of non-overlapping square tiles covering an image exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub rows: usize,
    pub cols: usize,
    pub tile_size: usize,
}

impl TileGrid {
    pub fn for_image(width: usize, height: usize, tile_size: usize) -> Result<Self> {
        if tile_size == 0 || width % tile_size != 0 || height % tile_size != 0 || width == 0 || height == 0
        {
            return Err(Error::TileShape {
                width,
                height,
                tile_size,
            });
        }
        Ok(Self {
            rows: height / tile_size,
            cols: width / tile_size,
            tile_size,
        })
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tiles in row-major order: tile `(i, j)` is at position `i * cols + j`.
    pub fn split<T: Copy>(&self, image: &Buffer2<T>) -> Vec<Buffer2<T>> {
        let ts = self.tile_size;
        let mut tiles = Vec::with_capacity(self.len());
        for i in 0..self.rows {
            for j in 0..self.cols {
                tiles.push(image.block(j * ts, i * ts, ts, ts));
            }
        }
        tiles
    }

    /// Inverse of `split`.
    pub fn stitch<T: Copy + Default>(&self, tiles: &[Buffer2<T>]) -> Result<Buffer2<T>> {
        if tiles.len() != self.len() {
            return Err(Error::BatchSize {
                expected: self.len(),
                actual: tiles.len(),
            });
        }

        let ts = self.tile_size;
        let mut image = Buffer2::new_default(self.cols * ts, self.rows * ts);
        for (k, tile) in tiles.iter().enumerate() {
            if tile.dimensions() != (ts, ts) {
                return Err(Error::FrameShape {
                    expected: (ts, ts),
                    actual: tile.dimensions(),
                });
            }
            let (i, j) = (k / self.cols, k % self.cols);
            image.paste(tile, j * ts, i * ts);
        }
        Ok(image)
    }
}

/// Nearest-neighbour 2x upsampling.
pub fn upsample2x<T: Copy>(image: &Buffer2<T>) -> Buffer2<T> {
    Buffer2::from_fn(image.width() * 2, image.height() * 2, |x, y| {
        *image.get(x / 2, y / 2)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_spans_unit_range() {
        let image = Buffer2::new(3, 1, vec![100u16, 150, 200]);
        let normalized = normalize(&image);
        assert_eq!(normalized.pixels()[0], 0.0);
        assert!((normalized.pixels()[1] - 0.5).abs() < 1e-6);
        assert!(normalized.pixels()[2] <= 1.0 && normalized.pixels()[2] > 0.999);
    }

    #[test]
    fn flat_image_normalizes_to_zero() {
        let normalized = normalize(&Buffer2::new_filled(4, 4, 1234u16));
        assert!(normalized.pixels().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn split_is_row_major_and_stitch_inverts_it() {
        // 4 x 2 image of 2 px tiles: one row of two tiles.
        let image = Buffer2::from_fn(4, 2, |x, y| (y * 4 + x) as u16);
        let grid = TileGrid::for_image(4, 2, 2).unwrap();
        assert_eq!((grid.rows, grid.cols), (1, 2));

        let tiles = grid.split(&image);
        assert_eq!(tiles[0].pixels(), &[0, 1, 4, 5]);
        assert_eq!(tiles[1].pixels(), &[2, 3, 6, 7]);
        assert_eq!(grid.stitch(&tiles).unwrap(), image);
    }

    #[test]
    fn stitch_keeps_tiles_in_place_on_a_square_grid() {
        let grid = TileGrid::for_image(4, 4, 2).unwrap();
        let tiles: Vec<Buffer2<u8>> = (0..4).map(|k| Buffer2::new_filled(2, 2, k as u8)).collect();
        let image = grid.stitch(&tiles).unwrap();
        // Tile 1 is row 0, column 1; not transposed to row 1, column 0.
        assert_eq!(*image.get(3, 0), 1);
        assert_eq!(*image.get(0, 3), 2);
        assert_eq!(*image.get(3, 3), 3);
    }

    #[test]
    fn grid_requires_whole_tiles() {
        assert!(matches!(
            TileGrid::for_image(300, 256, 256),
            Err(Error::TileShape { .. })
        ));
        assert!(TileGrid::for_image(0, 0, 256).is_err());
    }

    #[test]
    fn stitch_checks_batch_size() {
        let grid = TileGrid::for_image(4, 4, 2).unwrap();
        let err = grid.stitch(&[Buffer2::<u8>::new_default(2, 2)]).unwrap_err();
        assert!(matches!(err, Error::BatchSize { expected: 4, actual: 1 }));
    }

    #[test]
    fn upsample_repeats_pixels() {
        let image = Buffer2::new(2, 1, vec![1u8, 2]);
        let up = upsample2x(&image);
        assert_eq!(up.dimensions(), (4, 2));
        assert_eq!(up.pixels(), &[1, 1, 2, 2, 1, 1, 2, 2]);
    }
}
