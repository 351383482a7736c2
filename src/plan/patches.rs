//! Patch slicer: zero-copy views over a chunk buffer.
//!
//! A patch is a `(bands, size, size)` view into the chunk's full window,
//! produced lazily in row-major order. Only offsets and a borrowed view are
//! created; pixel data is never duplicated. Descriptors borrow the chunk
//! buffer, so the compiler enforces that no patch outlives its chunk.

use crate::core::config::EdgePolicy;
use crate::core::types::{ChunkBuffer, ChunkId};
use ndarray::{s, ArrayView3};

/// Owned placement tag for a patch: where it sits in its chunk's full
/// window, and how much of it is padding.
///
/// This is what survives inference; the borrowed view does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchPlacement {
    /// The chunk this patch was sliced from.
    pub chunk_id: ChunkId,
    /// Row of the patch origin, chunk-local (full window coordinates).
    pub row_offset: u32,
    /// Column of the patch origin, chunk-local.
    pub col_offset: u32,
    /// Declared (padded) patch side length.
    pub size: u32,
    /// Trailing rows that are padding, not raster content.
    pub pad_rows: u32,
    /// Trailing columns that are padding, not raster content.
    pub pad_cols: u32,
}

impl PatchPlacement {
    /// Rows of real raster content.
    pub fn content_height(&self) -> u32 {
        self.size - self.pad_rows
    }

    /// Columns of real raster content.
    pub fn content_width(&self) -> u32 {
        self.size - self.pad_cols
    }

    /// Whether any part of this patch is padding.
    pub fn is_padded(&self) -> bool {
        self.pad_rows > 0 || self.pad_cols > 0
    }
}

/// A non-owning view of one patch: placement plus a borrow of the chunk's
/// pixel data covering the patch's content region (padding excluded).
#[derive(Debug)]
pub struct PatchDescriptor<'a> {
    /// Placement of the patch within its chunk.
    pub placement: PatchPlacement,
    /// Borrowed `(bands, content_height, content_width)` view.
    pub view: ArrayView3<'a, f32>,
}

/// Slices a chunk into patches.
#[derive(Debug, Clone, Copy)]
pub struct PatchSlicer {
    patch_size: u32,
    stride: u32,
    edge_policy: EdgePolicy,
}

impl PatchSlicer {
    /// Create a slicer. `stride <= patch_size`; strides smaller than the
    /// patch size make patches overlap.
    pub fn new(patch_size: u32, stride: u32, edge_policy: EdgePolicy) -> Self {
        debug_assert!(stride > 0 && stride <= patch_size);
        Self {
            patch_size,
            stride,
            edge_policy,
        }
    }

    /// Number of patch origins along one axis of the given length.
    pub fn axis_count(&self, len: u32) -> usize {
        axis_count(len, self.patch_size, self.stride, self.edge_policy)
    }

    /// Total number of patches for a chunk of the given full size.
    pub fn patch_count(&self, height: u32, width: u32) -> usize {
        self.axis_count(height) * self.axis_count(width)
    }

    /// Lazily iterate patch views over the chunk's full window, row-major.
    pub fn slice<'a>(&self, chunk: &'a ChunkBuffer) -> PatchIter<'a> {
        let full = chunk.window.full();
        PatchIter {
            chunk,
            chunk_id: chunk.window.id,
            patch_size: self.patch_size,
            stride: self.stride,
            edge_policy: self.edge_policy,
            height: full.height,
            width: full.width,
            row: 0,
            col: 0,
            done: full.height < 1 || full.width < 1,
        }
    }
}

/// Patch origins along one axis: full steps of `stride`, plus one trailing
/// origin when the remainder policy keeps partial patches.
fn axis_count(len: u32, patch: u32, stride: u32, policy: EdgePolicy) -> usize {
    if len <= patch {
        return match policy {
            EdgePolicy::PadWithMask => 1,
            EdgePolicy::DropPartial => {
                if len == patch {
                    1
                } else {
                    0
                }
            }
        };
    }
    let span = len - patch;
    let full = (span / stride) as usize + 1;
    match policy {
        EdgePolicy::PadWithMask => {
            if span % stride == 0 {
                full
            } else {
                full + 1
            }
        }
        EdgePolicy::DropPartial => full,
    }
}

/// Lazy row-major iterator of patch descriptors for one chunk.
pub struct PatchIter<'a> {
    chunk: &'a ChunkBuffer,
    chunk_id: ChunkId,
    patch_size: u32,
    stride: u32,
    edge_policy: EdgePolicy,
    height: u32,
    width: u32,
    row: u32,
    col: u32,
    done: bool,
}

impl<'a> PatchIter<'a> {
    /// Next origin along an axis, or `None` when the axis is exhausted.
    fn advance(origin: u32, stride: u32, patch: u32, len: u32, policy: EdgePolicy) -> Option<u32> {
        let next = origin + stride;
        if next + patch <= len {
            return Some(next);
        }
        // A trailing origin still has content iff it starts inside the axis.
        if policy == EdgePolicy::PadWithMask && next < len && origin + patch < len {
            return Some(next);
        }
        None
    }

    fn descriptor_at(&self, row: u32, col: u32) -> PatchDescriptor<'a> {
        let content_h = self.patch_size.min(self.height - row);
        let content_w = self.patch_size.min(self.width - col);
        let placement = PatchPlacement {
            chunk_id: self.chunk_id,
            row_offset: row,
            col_offset: col,
            size: self.patch_size,
            pad_rows: self.patch_size - content_h,
            pad_cols: self.patch_size - content_w,
        };
        let view = self.chunk.data.slice(s![
            ..,
            row as usize..(row + content_h) as usize,
            col as usize..(col + content_w) as usize
        ]);
        PatchDescriptor { placement, view }
    }
}

impl<'a> Iterator for PatchIter<'a> {
    type Item = PatchDescriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // Under DropPartial a chunk smaller than one patch yields nothing.
        if self.edge_policy == EdgePolicy::DropPartial
            && (self.height < self.patch_size || self.width < self.patch_size)
        {
            self.done = true;
            return None;
        }

        let item = self.descriptor_at(self.row, self.col);

        match Self::advance(
            self.col,
            self.stride,
            self.patch_size,
            self.width,
            self.edge_policy,
        ) {
            Some(col) => self.col = col,
            None => {
                self.col = 0;
                match Self::advance(
                    self.row,
                    self.stride,
                    self.patch_size,
                    self.height,
                    self.edge_policy,
                ) {
                    Some(row) => self.row = row,
                    None => self.done = true,
                }
            }
        }

        Some(item)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::core::types::{ChunkWindow, Margin, RasterWindow};
    use ndarray::Array3;
    use proptest::prelude::*;

    fn count_formula(len: u32, p: u32, s: u32) -> usize {
        if len <= p {
            1
        } else {
            ((len - p) as f64 / s as f64).ceil() as usize + 1
        }
    }

    proptest! {
        // Patch count matches ceil((H-p)/s)+1 x ceil((W-p)/s)+1 under the
        // pad policy, and the iterator agrees with the closed form.
        #[test]
        fn count_matches_closed_form(
            height in 1u32..200,
            width in 1u32..200,
            patch in 1u32..48,
            stride_offset in 0u32..48,
        ) {
            let stride = 1 + stride_offset % patch;
            let window = ChunkWindow {
                id: ChunkId(0),
                valid: RasterWindow::new(0, 0, height, width),
                margin: Margin::default(),
            };
            let buffer = ChunkBuffer::new(
                window,
                Array3::zeros((1, height as usize, width as usize)),
            );

            let slicer = PatchSlicer::new(patch, stride, EdgePolicy::PadWithMask);
            let emitted = slicer.slice(&buffer).count();
            let expected = count_formula(height, patch, stride)
                * count_formula(width, patch, stride);
            prop_assert_eq!(emitted, expected);
            prop_assert_eq!(slicer.patch_count(height, width), expected);
        }

        // Every pixel of the chunk is covered by at least one patch's
        // content region under the pad policy.
        #[test]
        fn pad_policy_covers_chunk(
            height in 1u32..48,
            width in 1u32..48,
            patch in 1u32..16,
            stride_offset in 0u32..16,
        ) {
            let stride = 1 + stride_offset % patch;
            let window = ChunkWindow {
                id: ChunkId(0),
                valid: RasterWindow::new(0, 0, height, width),
                margin: Margin::default(),
            };
            let buffer = ChunkBuffer::new(
                window,
                Array3::zeros((1, height as usize, width as usize)),
            );

            let mut covered = vec![false; (height * width) as usize];
            let slicer = PatchSlicer::new(patch, stride, EdgePolicy::PadWithMask);
            for p in slicer.slice(&buffer) {
                for r in 0..p.placement.content_height() {
                    for c in 0..p.placement.content_width() {
                        let rr = p.placement.row_offset + r;
                        let cc = p.placement.col_offset + c;
                        covered[(rr * width + cc) as usize] = true;
                    }
                }
            }
            prop_assert!(covered.iter().all(|&v| v));
        }
    }
}
