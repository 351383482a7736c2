//! Chunk planner.
//!
//! Partitions the raster extent into a row-major grid of chunk windows.
//! Valid regions tile the extent exactly; each window carries a per-side
//! margin clamped at the raster boundary. The sequence is lazy and
//! restartable: [`ChunkGrid::windows`] can be called any number of times.

use crate::core::error::ConfigError;
use crate::core::types::{ChunkId, ChunkWindow, Margin, RasterExtent, RasterWindow};

/// The chunk layout for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkGrid {
    extent_height: u32,
    extent_width: u32,
    chunk_size: u32,
    margin: u32,
}

impl ChunkGrid {
    /// Build a grid over the extent with the given valid chunk side and
    /// overlap margin.
    pub fn new(extent: &RasterExtent, chunk_size: u32, margin: u32) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "chunk_size".to_string(),
                reason: "must be nonzero".to_string(),
            });
        }
        if extent.width == 0 || extent.height == 0 {
            return Err(ConfigError::InvalidValue {
                key: "extent".to_string(),
                reason: format!("degenerate extent {}x{}", extent.width, extent.height),
            });
        }
        Ok(Self {
            extent_height: extent.height,
            extent_width: extent.width,
            chunk_size,
            margin,
        })
    }

    /// Number of chunk rows.
    pub fn rows(&self) -> u32 {
        self.extent_height.div_ceil(self.chunk_size)
    }

    /// Number of chunk columns.
    pub fn cols(&self) -> u32 {
        self.extent_width.div_ceil(self.chunk_size)
    }

    /// Total number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.rows() as usize * self.cols() as usize
    }

    /// The configured overlap margin.
    pub fn margin(&self) -> u32 {
        self.margin
    }

    /// Iterate the chunk windows in row-major order. Restartable: each call
    /// yields a fresh, side-effect-free iterator over the same sequence.
    pub fn windows(&self) -> ChunkWindows {
        ChunkWindows {
            grid: self.clone(),
            next: 0,
        }
    }

    fn window_at(&self, index: u64) -> ChunkWindow {
        let cols = self.cols() as u64;
        let grid_row = (index / cols) as u32;
        let grid_col = (index % cols) as u32;

        let row_start = grid_row * self.chunk_size;
        let col_start = grid_col * self.chunk_size;
        let height = self.chunk_size.min(self.extent_height - row_start);
        let width = self.chunk_size.min(self.extent_width - col_start);
        let valid = RasterWindow::new(row_start, col_start, height, width);

        // Margins are clamped at raster edges, never padded.
        let margin = Margin {
            top: self.margin.min(row_start),
            left: self.margin.min(col_start),
            bottom: self.margin.min(self.extent_height - valid.row_end()),
            right: self.margin.min(self.extent_width - valid.col_end()),
        };

        ChunkWindow {
            id: ChunkId(index),
            valid,
            margin,
        }
    }
}

/// Row-major iterator over a grid's chunk windows.
#[derive(Debug, Clone)]
pub struct ChunkWindows {
    grid: ChunkGrid,
    next: u64,
}

impl Iterator for ChunkWindows {
    type Item = ChunkWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.grid.chunk_count() as u64 {
            return None;
        }
        let window = self.grid.window_at(self.next);
        self.next += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.chunk_count() - self.next as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkWindows {}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(w: u32, h: u32) -> RasterExtent {
        RasterExtent::new(w, h, 1)
    }

    #[test]
    fn row_major_order_and_count() {
        let grid = ChunkGrid::new(&extent(100, 100), 64, 0).unwrap();
        let windows: Vec<_> = grid.windows().collect();
        assert_eq!(windows.len(), 4);
        assert_eq!(grid.chunk_count(), 4);

        assert_eq!(windows[0].valid, RasterWindow::new(0, 0, 64, 64));
        assert_eq!(windows[1].valid, RasterWindow::new(0, 64, 64, 36));
        assert_eq!(windows[2].valid, RasterWindow::new(64, 0, 36, 64));
        assert_eq!(windows[3].valid, RasterWindow::new(64, 64, 36, 36));
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.id, ChunkId(i as u64));
        }
    }

    #[test]
    fn margins_clamped_at_edges() {
        let grid = ChunkGrid::new(&extent(200, 200), 100, 16).unwrap();
        let windows: Vec<_> = grid.windows().collect();

        // Top-left chunk: no margin above or left of the raster.
        assert_eq!(windows[0].margin.top, 0);
        assert_eq!(windows[0].margin.left, 0);
        assert_eq!(windows[0].margin.bottom, 16);
        assert_eq!(windows[0].margin.right, 16);

        // Bottom-right chunk: mirrored.
        let last = windows.last().unwrap();
        assert_eq!(last.margin.top, 16);
        assert_eq!(last.margin.left, 16);
        assert_eq!(last.margin.bottom, 0);
        assert_eq!(last.margin.right, 0);

        // Full windows never extend past the raster.
        for w in &windows {
            assert!(w.full().fits(&extent(200, 200)));
        }
    }

    #[test]
    fn restartable_without_side_effects() {
        let grid = ChunkGrid::new(&extent(300, 150), 128, 8).unwrap();
        let first: Vec<_> = grid.windows().collect();
        let second: Vec<_> = grid.windows().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn single_chunk_when_extent_fits() {
        let grid = ChunkGrid::new(&extent(50, 50), 64, 8).unwrap();
        let windows: Vec<_> = grid.windows().collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].valid, RasterWindow::new(0, 0, 50, 50));
        assert_eq!(windows[0].margin, Margin::default());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Valid regions cover every pixel exactly once: no gaps, no overlap.
        #[test]
        fn valid_regions_tile_exactly(
            width in 1u32..300,
            height in 1u32..300,
            chunk_size in 1u32..128,
            margin in 0u32..32,
        ) {
            let ext = RasterExtent::new(width, height, 1);
            let grid = ChunkGrid::new(&ext, chunk_size, margin).unwrap();

            let mut covered = vec![0u8; (width * height) as usize];
            for w in grid.windows() {
                prop_assert!(w.valid.fits(&ext));
                prop_assert!(w.full().fits(&ext));
                for r in w.valid.row_start..w.valid.row_end() {
                    for c in w.valid.col_start..w.valid.col_end() {
                        covered[(r * width + c) as usize] += 1;
                    }
                }
            }
            prop_assert!(covered.iter().all(|&n| n == 1));
        }

        // Area identity holds for any geometry.
        #[test]
        fn areas_sum_to_extent(
            width in 1u32..2000,
            height in 1u32..2000,
            chunk_size in 32u32..1024,
        ) {
            let ext = RasterExtent::new(width, height, 1);
            let grid = ChunkGrid::new(&ext, chunk_size, 0).unwrap();
            let total: u64 = grid.windows().map(|w| w.valid.area()).sum();
            prop_assert_eq!(total, ext.pixel_count());
        }
    }
}
