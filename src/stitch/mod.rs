//! Stitcher / overlap resolver.
//!
//! Merges a chunk's patch results into one probability cube, resolves
//! pixels covered by several patches according to the configured policy,
//! then crops the cube to the chunk's valid window. Merging is
//! deterministic: results are ordered by placement before any pixel is
//! written, so arrival order never changes the output.

use crate::core::config::OverlapPolicy;
use crate::core::error::GeometryError;
use crate::core::types::{ChunkResult, ChunkWindow};
use crate::infer::PatchResult;
use ndarray::{s, Array2, Array3};

/// Merges patch results for one chunk at a time.
#[derive(Debug, Clone, Copy)]
pub struct Stitcher {
    policy: OverlapPolicy,
    num_classes: usize,
}

impl Stitcher {
    /// Create a stitcher with a fixed per-run policy.
    pub fn new(policy: OverlapPolicy, num_classes: usize) -> Self {
        Self {
            policy,
            num_classes,
        }
    }

    /// The configured merge policy.
    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    /// Merge all patch results of a chunk and crop to its valid window.
    ///
    /// Each patch contributes only its content region; padded extents never
    /// reach the output. Pixels covered by no patch (possible only under
    /// the drop-partial edge policy) stay zero.
    pub fn stitch(
        &self,
        window: &ChunkWindow,
        mut results: Vec<PatchResult>,
    ) -> Result<ChunkResult, GeometryError> {
        let full = window.full();
        let (fh, fw) = (full.height as usize, full.width as usize);

        // Placement order, not arrival order.
        results.sort_by_key(|r| (r.placement.row_offset, r.placement.col_offset));

        for result in &results {
            self.check_result(window, result)?;
        }

        let merged = match self.policy {
            OverlapPolicy::CenterWeighted => self.merge_center_weighted(fh, fw, &results),
            OverlapPolicy::LastWriterWins => self.merge_last_writer(fh, fw, &results),
        };

        let top = window.valid_row_offset() as usize;
        let left = window.valid_col_offset() as usize;
        let probs = merged
            .slice(s![
                ..,
                top..top + window.valid.height as usize,
                left..left + window.valid.width as usize
            ])
            .to_owned();

        Ok(ChunkResult {
            window: *window,
            valid_window: window.valid,
            probs,
        })
    }

    fn check_result(
        &self,
        window: &ChunkWindow,
        result: &PatchResult,
    ) -> Result<(), GeometryError> {
        let full = window.full();
        let p = &result.placement;
        if p.row_offset + p.content_height() > full.height
            || p.col_offset + p.content_width() > full.width
        {
            return Err(GeometryError::PatchOutOfBounds {
                chunk: window.id,
                row_offset: p.row_offset,
                col_offset: p.col_offset,
                size: p.size,
            });
        }
        let dim = result.output.dim();
        if dim.0 != self.num_classes || dim.1 < p.content_height() as usize || dim.2 < p.content_width() as usize {
            return Err(GeometryError::ShapeMismatch {
                expected: format!(
                    "({}, >={}, >={})",
                    self.num_classes,
                    p.content_height(),
                    p.content_width()
                ),
                got: format!("{dim:?}"),
            });
        }
        Ok(())
    }

    fn merge_center_weighted(
        &self,
        fh: usize,
        fw: usize,
        results: &[PatchResult],
    ) -> Array3<f32> {
        let mut accum = Array3::<f32>::zeros((self.num_classes, fh, fw));
        let mut weights = Array2::<f32>::zeros((fh, fw));

        for result in results {
            let p = &result.placement;
            // Center of the declared patch extent, patch-local coordinates.
            let center = (p.size.saturating_sub(1)) as f32 / 2.0;
            for r in 0..p.content_height() as usize {
                for c in 0..p.content_width() as usize {
                    let d = (r as f32 - center)
                        .abs()
                        .max((c as f32 - center).abs());
                    let w = 1.0 / (1.0 + d);
                    let rr = p.row_offset as usize + r;
                    let cc = p.col_offset as usize + c;
                    for k in 0..self.num_classes {
                        accum[[k, rr, cc]] += w * result.output[[k, r, c]];
                    }
                    weights[[rr, cc]] += w;
                }
            }
        }

        for rr in 0..fh {
            for cc in 0..fw {
                let w = weights[[rr, cc]];
                if w > 0.0 {
                    for k in 0..self.num_classes {
                        accum[[k, rr, cc]] /= w;
                    }
                }
            }
        }
        accum
    }

    fn merge_last_writer(&self, fh: usize, fw: usize, results: &[PatchResult]) -> Array3<f32> {
        let mut out = Array3::<f32>::zeros((self.num_classes, fh, fw));
        for result in results {
            let p = &result.placement;
            let rr = p.row_offset as usize;
            let cc = p.col_offset as usize;
            let ch = p.content_height() as usize;
            let cw = p.content_width() as usize;
            out.slice_mut(s![.., rr..rr + ch, cc..cc + cw])
                .assign(&result.output.slice(s![.., ..ch, ..cw]));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EdgePolicy;
    use crate::core::types::{ChunkBuffer, ChunkId, Margin, RasterWindow};
    use crate::infer::{InferenceDriver, MeanProbe};
    use crate::io::{MemoryRasterSource, RasterSource};
    use crate::plan::grid::ChunkGrid;
    use crate::plan::patches::{PatchPlacement, PatchSlicer};
    use ndarray::{s, Array3};

    fn placement(row: u32, col: u32, size: u32) -> PatchPlacement {
        PatchPlacement {
            chunk_id: ChunkId(0),
            row_offset: row,
            col_offset: col,
            size,
            pad_rows: 0,
            pad_cols: 0,
        }
    }

    fn window(height: u32, width: u32) -> ChunkWindow {
        ChunkWindow {
            id: ChunkId(0),
            valid: RasterWindow::new(0, 0, height, width),
            margin: Margin::default(),
        }
    }

    fn constant_patch(row: u32, col: u32, size: u32, value: f32) -> PatchResult {
        PatchResult {
            placement: placement(row, col, size),
            output: Array3::from_elem((1, size as usize, size as usize), value),
        }
    }

    #[test]
    fn single_patch_passes_through() {
        let stitcher = Stitcher::new(OverlapPolicy::CenterWeighted, 1);
        let result = stitcher
            .stitch(&window(4, 4), vec![constant_patch(0, 0, 4, 0.7)])
            .unwrap();
        assert_eq!(result.probs.dim(), (1, 4, 4));
        for v in result.probs.iter() {
            assert!((v - 0.7).abs() < 1e-6);
        }
    }

    #[test]
    fn identical_votes_merge_to_the_vote() {
        // Two overlapping patches voting the same value: the weighted
        // average must return that value.
        let stitcher = Stitcher::new(OverlapPolicy::CenterWeighted, 1);
        let result = stitcher
            .stitch(
                &window(4, 6),
                vec![constant_patch(0, 0, 4, 0.3), constant_patch(0, 2, 4, 0.3)],
            )
            .unwrap();
        for v in result.probs.iter() {
            assert!((v - 0.3).abs() < 1e-5);
        }
    }

    #[test]
    fn center_weighting_favors_patch_centers() {
        // Left patch (cols 0..4) votes 0.0, right patch (cols 2..6) votes
        // 1.0; they overlap on columns 2..4. Column 2 sits nearer the left
        // patch's center, column 3 nearer the right's.
        let stitcher = Stitcher::new(OverlapPolicy::CenterWeighted, 1);
        let result = stitcher
            .stitch(
                &window(4, 6),
                vec![constant_patch(0, 0, 4, 0.0), constant_patch(0, 2, 4, 1.0)],
            )
            .unwrap();
        let near_left_center = result.probs[[0, 1, 2]];
        let near_right_center = result.probs[[0, 1, 3]];
        assert!(near_left_center < 0.5);
        assert!(near_right_center > 0.5);
        assert!(near_left_center > 0.0 && near_right_center < 1.0);
    }

    #[test]
    fn last_writer_wins_in_raster_order() {
        let stitcher = Stitcher::new(OverlapPolicy::LastWriterWins, 1);
        // Delivered out of order on purpose; placement order must win.
        let result = stitcher
            .stitch(
                &window(4, 6),
                vec![constant_patch(0, 2, 4, 1.0), constant_patch(0, 0, 4, 0.0)],
            )
            .unwrap();
        // Overlap columns 2..4 belong to the later patch in raster order.
        assert_eq!(result.probs[[0, 0, 2]], 1.0);
        assert_eq!(result.probs[[0, 0, 3]], 1.0);
        assert_eq!(result.probs[[0, 0, 0]], 0.0);
    }

    #[test]
    fn merge_is_deterministic_and_idempotent() {
        let stitcher = Stitcher::new(OverlapPolicy::CenterWeighted, 1);
        let results = || {
            vec![
                constant_patch(0, 0, 4, 0.2),
                constant_patch(0, 2, 4, 0.9),
                constant_patch(2, 0, 4, 0.4),
            ]
        };
        let a = stitcher.stitch(&window(6, 6), results()).unwrap();
        let b = stitcher.stitch(&window(6, 6), results()).unwrap();
        // Byte-identical, not merely close.
        assert_eq!(
            a.probs.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            b.probs.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );

        // Arrival order must not matter either.
        let mut shuffled = results();
        shuffled.reverse();
        let c = stitcher.stitch(&window(6, 6), shuffled).unwrap();
        assert_eq!(
            a.probs.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            c.probs.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn margin_is_cropped() {
        let chunk = ChunkWindow {
            id: ChunkId(0),
            valid: RasterWindow::new(2, 2, 4, 4),
            margin: Margin::symmetric(2),
        };
        // Full window is 8x8. One patch covers it with a gradient so we can
        // check the crop offset.
        let output = Array3::from_shape_fn((1, 8, 8), |(_, r, c)| (r * 10 + c) as f32);
        let result = PatchResult {
            placement: placement(0, 0, 8),
            output,
        };
        let stitcher = Stitcher::new(OverlapPolicy::LastWriterWins, 1);
        let stitched = stitcher.stitch(&chunk, vec![result]).unwrap();
        assert_eq!(stitched.probs.dim(), (1, 4, 4));
        assert_eq!(stitched.valid_window, chunk.valid);
        // Top-left of the valid region is full-window pixel (2, 2).
        assert_eq!(stitched.probs[[0, 0, 0]], 22.0);
    }

    #[test]
    fn out_of_bounds_patch_is_a_geometry_error() {
        let stitcher = Stitcher::new(OverlapPolicy::LastWriterWins, 1);
        let err = stitcher
            .stitch(&window(4, 4), vec![constant_patch(2, 2, 4, 0.5)])
            .unwrap_err();
        assert!(matches!(err, GeometryError::PatchOutOfBounds { .. }));
    }

    #[test]
    fn wrong_class_count_is_a_shape_error() {
        let stitcher = Stitcher::new(OverlapPolicy::LastWriterWins, 3);
        let err = stitcher
            .stitch(&window(4, 4), vec![constant_patch(0, 0, 4, 0.5)])
            .unwrap_err();
        assert!(matches!(err, GeometryError::ShapeMismatch { .. }));
    }

    /// Stitch every chunk of a grid and paste the valid outputs into one
    /// mosaic, driving the real slicer/driver/probe.
    fn mosaic(
        source: &MemoryRasterSource,
        chunk_size: u32,
        margin: u32,
        policy: OverlapPolicy,
    ) -> Array3<f32> {
        let extent = source.extent().clone();
        let grid = ChunkGrid::new(&extent, chunk_size, margin).unwrap();
        let probe = MeanProbe::new(2);
        let slicer = PatchSlicer::new(8, 4, EdgePolicy::PadWithMask);
        let driver = InferenceDriver::new(&probe, 4, 8);
        let stitcher = Stitcher::new(policy, 2);

        let mut out = Array3::<f32>::zeros((2, extent.height as usize, extent.width as usize));
        for window in grid.windows() {
            let buffer: ChunkBuffer = source.read_window(&window).unwrap();
            let results = driver.infer_chunk(&buffer, &slicer).unwrap();
            let stitched = stitcher.stitch(&window, results).unwrap();
            let v = stitched.valid_window;
            out.slice_mut(s![
                ..,
                v.row_start as usize..v.row_end() as usize,
                v.col_start as usize..v.col_end() as usize
            ])
            .assign(&stitched.probs);
        }
        out
    }

    #[test]
    fn chunk_boundaries_are_invisible() {
        // The probe is pixel-local, so for any margin the mosaic must not
        // depend on the chunking. Compare a single-chunk run against a
        // 2x2-chunk run with margins.
        let source = MemoryRasterSource::from_fn(32, 32, 1, |_, r, c| {
            ((r * 13 + c * 7) % 97) as f32 / 97.0
        });

        let whole = mosaic(&source, 32, 0, OverlapPolicy::CenterWeighted);
        let chunked = mosaic(&source, 16, 8, OverlapPolicy::CenterWeighted);
        for (a, b) in whole.iter().zip(chunked.iter()) {
            assert!((a - b).abs() < 1e-5, "mosaics diverge: {a} vs {b}");
        }

        // Last-writer-wins is bitwise chunking-independent for a
        // pixel-local capability.
        let whole = mosaic(&source, 32, 0, OverlapPolicy::LastWriterWins);
        let chunked = mosaic(&source, 16, 8, OverlapPolicy::LastWriterWins);
        for (a, b) in whole.iter().zip(chunked.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}
