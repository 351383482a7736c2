//! Raster source boundary.
//!
//! Decoding bytes from disk or network is a collaborator's job; the engine
//! only needs an extent and windowed reads. [`MemoryRasterSource`] backs
//! synthetic rasters and tests.

use crate::core::error::SourceError;
use crate::core::types::{ChunkBuffer, ChunkWindow, RasterExtent};
use ndarray::{s, Array3};

/// A readable raster, addressed by chunk window.
///
/// Implementations must be cheap to query for the extent and must return
/// the full (margin-included) window as one band-major buffer. The read
/// stage is the only caller.
pub trait RasterSource: Send + Sync {
    /// The raster's full dimensions. Immutable for a run.
    fn extent(&self) -> &RasterExtent;

    /// Read the chunk's full window into a fresh buffer.
    fn read_window(&self, window: &ChunkWindow) -> Result<ChunkBuffer, SourceError>;
}

/// An in-memory raster, for synthetic inputs and tests.
pub struct MemoryRasterSource {
    extent: RasterExtent,
    data: Array3<f32>,
}

impl MemoryRasterSource {
    /// Wrap an existing band-major `(bands, height, width)` array.
    pub fn new(data: Array3<f32>, geo: crate::core::types::GeoProfile) -> Self {
        let (bands, height, width) = data.dim();
        let mut extent = RasterExtent::new(width as u32, height as u32, bands as u32);
        extent.geo = geo;
        Self { extent, data }
    }

    /// Build a synthetic raster from a per-pixel function `(band, row, col) -> value`.
    pub fn from_fn<F>(width: u32, height: u32, bands: u32, f: F) -> Self
    where
        F: Fn(u32, u32, u32) -> f32,
    {
        let data = Array3::from_shape_fn(
            (bands as usize, height as usize, width as usize),
            |(b, r, c)| f(b as u32, r as u32, c as u32),
        );
        Self::new(data, crate::core::types::GeoProfile::default())
    }

    /// Borrow the backing array.
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }
}

impl RasterSource for MemoryRasterSource {
    fn extent(&self) -> &RasterExtent {
        &self.extent
    }

    fn read_window(&self, window: &ChunkWindow) -> Result<ChunkBuffer, SourceError> {
        let full = window.full();
        if !full.fits(&self.extent) {
            return Err(SourceError::WindowOutOfBounds {
                row_start: full.row_start,
                col_start: full.col_start,
                height: full.height,
                width: full.width,
            });
        }
        let slab = self
            .data
            .slice(s![
                ..,
                full.row_start as usize..full.row_end() as usize,
                full.col_start as usize..full.col_end() as usize
            ])
            .to_owned();
        Ok(ChunkBuffer::new(*window, slab))
    }
}
