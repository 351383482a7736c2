//! A reference inference capability.
//!
//! `MeanProbe` scores every pixel from its band mean alone. It is not a
//! model; it exists so the pipeline can be exercised end-to-end (demos,
//! tests, smoke runs) without external weights. Because its output depends
//! only on the input pixel, stitched mosaics are chunking-independent,
//! which is exactly what the boundary-invisibility tests need.

use crate::core::error::InferenceError;
use crate::infer::{InferenceCapability, PreparedBatch, RawBatchOutput};
use ndarray::Array4;

/// Pixel-local probe capability: class 0 scores the clamped band mean, the
/// remaining classes split the complement evenly.
#[derive(Debug, Clone)]
pub struct MeanProbe {
    num_classes: usize,
    receptive_field: u32,
}

impl MeanProbe {
    /// Create a probe with the given class count (at least 1).
    pub fn new(num_classes: usize) -> Self {
        assert!(num_classes >= 1);
        Self {
            num_classes,
            receptive_field: 0,
        }
    }

    /// Declare a nonzero receptive field, for exercising margin handling.
    pub fn with_receptive_field(mut self, margin: u32) -> Self {
        self.receptive_field = margin;
        self
    }

}

impl InferenceCapability for MeanProbe {
    fn name(&self) -> &str {
        "mean_probe"
    }

    fn receptive_field(&self) -> u32 {
        self.receptive_field
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn run(&self, batch: PreparedBatch) -> Result<RawBatchOutput, InferenceError> {
        let (n, bands, h, w) = batch.data.dim();
        let k = self.num_classes;
        let mut out = Array4::<f32>::zeros((n, k, h, w));
        for i in 0..n {
            for r in 0..h {
                for c in 0..w {
                    let mut sum = 0.0f32;
                    for b in 0..bands {
                        sum += batch.data[[i, b, r, c]];
                    }
                    let m = (sum / bands as f32).clamp(0.0, 1.0);
                    if k == 1 {
                        out[[i, 0, r, c]] = 1.0;
                        continue;
                    }
                    let rest = (1.0 - m) / (k - 1) as f32;
                    out[[i, 0, r, c]] = m;
                    for class in 1..k {
                        out[[i, class, r, c]] = rest;
                    }
                }
            }
        }
        Ok(RawBatchOutput {
            data: out,
            placements: batch.placements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::PatchResult;
    use ndarray::Array4;

    fn run_probe(probe: &MeanProbe, data: Array4<f32>) -> Vec<PatchResult> {
        let placements = (0..data.dim().0)
            .map(|i| crate::plan::patches::PatchPlacement {
                chunk_id: crate::core::types::ChunkId(0),
                row_offset: 0,
                col_offset: i as u32,
                size: data.dim().2 as u32,
                pad_rows: 0,
                pad_cols: 0,
            })
            .collect();
        let raw = probe
            .run(PreparedBatch {
                data,
                placements,
            })
            .unwrap();
        probe.finalize(raw).unwrap()
    }

    #[test]
    fn scores_sum_to_one() {
        let probe = MeanProbe::new(4);
        let data = Array4::from_elem((1, 2, 3, 3), 0.3);
        let results = run_probe(&probe, data);
        let total: f32 = (0..4).map(|k| results[0].output[[k, 1, 1]]).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn class_zero_tracks_the_mean() {
        let probe = MeanProbe::new(2);
        let mut data = Array4::zeros((1, 1, 2, 2));
        data[[0, 0, 0, 0]] = 0.75;
        let results = run_probe(&probe, data);
        assert!((results[0].output[[0, 0, 0]] - 0.75).abs() < 1e-6);
        assert!((results[0].output[[1, 0, 0]] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_means_are_clamped() {
        let probe = MeanProbe::new(2);
        let data = Array4::from_elem((1, 1, 1, 1), 7.0);
        let results = run_probe(&probe, data);
        assert_eq!(results[0].output[[0, 0, 0]], 1.0);
        assert_eq!(results[0].output[[1, 0, 0]], 0.0);
    }
}
