//! Core geometry and buffer types for the tiling engine.
//!
//! Everything here is plain data: rectangular windows over a raster, the
//! chunk windows produced by the planner, and the band-major float buffers
//! that flow through the pipeline. Pixel coordinates are `(row, col)` with
//! the origin at the top-left of the raster.

use ndarray::{s, Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Ordinal identifier of a chunk within a run, assigned in planner order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

/// Opaque geospatial reference carried through the pipeline untouched.
///
/// The engine never interprets these values; they exist so reporters can
/// georeference their outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoProfile {
    /// Affine transform coefficients (row-major 2x3).
    pub transform: [f64; 6],
    /// Coordinate reference system, as an opaque string (e.g. "EPSG:32633").
    pub crs: String,
}

impl Default for GeoProfile {
    fn default() -> Self {
        Self {
            transform: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            crs: String::new(),
        }
    }
}

/// Full dimensions of the source raster. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterExtent {
    /// Total width in pixels.
    pub width: u32,
    /// Total height in pixels.
    pub height: u32,
    /// Number of spectral bands.
    pub bands: u32,
    /// Geospatial reference, passed through to reporters.
    pub geo: GeoProfile,
}

impl RasterExtent {
    /// Create an extent with a default (identity) geo profile.
    pub fn new(width: u32, height: u32, bands: u32) -> Self {
        Self {
            width,
            height,
            bands,
            geo: GeoProfile::default(),
        }
    }

    /// Total pixel count of one band.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A rectangular region within the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterWindow {
    /// First row covered by the window.
    pub row_start: u32,
    /// First column covered by the window.
    pub col_start: u32,
    /// Height in pixels.
    pub height: u32,
    /// Width in pixels.
    pub width: u32,
}

impl RasterWindow {
    /// Create a new window.
    pub fn new(row_start: u32, col_start: u32, height: u32, width: u32) -> Self {
        Self {
            row_start,
            col_start,
            height,
            width,
        }
    }

    /// One past the last row (exclusive).
    pub fn row_end(&self) -> u32 {
        self.row_start + self.height
    }

    /// One past the last column (exclusive).
    pub fn col_end(&self) -> u32 {
        self.col_start + self.width
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.height as u64 * self.width as u64
    }

    /// Whether this window lies entirely within the given extent.
    pub fn fits(&self, extent: &RasterExtent) -> bool {
        self.row_end() <= extent.height && self.col_end() <= extent.width
    }

    /// Whether two windows share any pixel.
    pub fn intersects(&self, other: &RasterWindow) -> bool {
        self.row_start < other.row_end()
            && other.row_start < self.row_end()
            && self.col_start < other.col_end()
            && other.col_start < self.col_end()
    }
}

/// Per-side overlap margin, clamped at raster edges.
///
/// Margins are asymmetric: a chunk touching the top of the raster has a
/// zero top margin, never synthetic padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Margin {
    /// Rows above the valid region.
    pub top: u32,
    /// Columns left of the valid region.
    pub left: u32,
    /// Rows below the valid region.
    pub bottom: u32,
    /// Columns right of the valid region.
    pub right: u32,
}

impl Margin {
    /// A symmetric margin (same on all sides).
    pub fn symmetric(m: u32) -> Self {
        Self {
            top: m,
            left: m,
            bottom: m,
            right: m,
        }
    }
}

/// One chunk of the raster: a valid region plus its clamped overlap margin.
///
/// The valid regions of a run's chunks exactly tile the raster extent; the
/// margin-expanded (full) regions may overlap at chunk borders only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkWindow {
    /// Ordinal id in planner emission order.
    pub id: ChunkId,
    /// The margin-free region this chunk is authoritative for.
    pub valid: RasterWindow,
    /// Clamped margins around the valid region.
    pub margin: Margin,
}

impl ChunkWindow {
    /// The margin-expanded region actually read and processed.
    pub fn full(&self) -> RasterWindow {
        RasterWindow::new(
            self.valid.row_start - self.margin.top,
            self.valid.col_start - self.margin.left,
            self.valid.height + self.margin.top + self.margin.bottom,
            self.valid.width + self.margin.left + self.margin.right,
        )
    }

    /// Row offset of the valid region inside the full buffer.
    pub fn valid_row_offset(&self) -> u32 {
        self.margin.top
    }

    /// Column offset of the valid region inside the full buffer.
    pub fn valid_col_offset(&self) -> u32 {
        self.margin.left
    }
}

/// Pixel data for one chunk, band-major `(bands, rows, cols)`, covering the
/// chunk's full (margin-included) window.
///
/// The pipeline owns exactly one of these per in-flight chunk; patch views
/// borrow from it and must not outlive it.
#[derive(Debug)]
pub struct ChunkBuffer {
    /// The window this buffer covers.
    pub window: ChunkWindow,
    /// Band-major pixel data for the full window.
    pub data: Array3<f32>,
}

impl ChunkBuffer {
    /// Wrap a buffer, checking that its shape matches the window.
    pub fn new(window: ChunkWindow, data: Array3<f32>) -> Self {
        let full = window.full();
        debug_assert_eq!(data.shape()[1], full.height as usize);
        debug_assert_eq!(data.shape()[2], full.width as usize);
        Self { window, data }
    }

    /// Number of bands.
    pub fn bands(&self) -> u32 {
        self.data.shape()[0] as u32
    }

    /// Borrow the whole buffer.
    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// Size of the pixel data in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// The merged, margin-cropped prediction for one chunk.
///
/// `probs` is `(classes, valid_height, valid_width)` and aligns with
/// `valid_window` in raster coordinates. Handed to reporters once, in
/// planner order, then released.
#[derive(Debug)]
pub struct ChunkResult {
    /// The chunk this result belongs to.
    pub window: ChunkWindow,
    /// Raster placement of the data (the chunk's valid region).
    pub valid_window: RasterWindow,
    /// Merged class probabilities for the valid region.
    pub probs: Array3<f32>,
}

impl ChunkResult {
    /// Number of classes in the probability cube.
    pub fn num_classes(&self) -> usize {
        self.probs.shape()[0]
    }

    /// Borrow one class plane.
    pub fn class_plane(&self, class: usize) -> ArrayView3<'_, f32> {
        self.probs.slice(s![class..class + 1, .., ..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_edges() {
        let w = RasterWindow::new(10, 20, 100, 200);
        assert_eq!(w.row_end(), 110);
        assert_eq!(w.col_end(), 220);
        assert_eq!(w.area(), 20_000);
    }

    #[test]
    fn window_intersection() {
        let a = RasterWindow::new(0, 0, 10, 10);
        let b = RasterWindow::new(5, 5, 10, 10);
        let c = RasterWindow::new(10, 0, 10, 10);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn chunk_window_full_region() {
        let chunk = ChunkWindow {
            id: ChunkId(0),
            valid: RasterWindow::new(100, 100, 50, 50),
            margin: Margin {
                top: 10,
                left: 10,
                bottom: 0,
                right: 5,
            },
        };
        let full = chunk.full();
        assert_eq!(full.row_start, 90);
        assert_eq!(full.col_start, 90);
        assert_eq!(full.height, 60);
        assert_eq!(full.width, 65);
        assert_eq!(chunk.valid_row_offset(), 10);
        assert_eq!(chunk.valid_col_offset(), 10);
    }

    #[test]
    fn run_id_display_is_short() {
        let id = RunId::new();
        assert_eq!(format!("{}", id).len(), 8);
    }
}
