//! Inference driver: batches patch views and drives the capability.
//!
//! The driver slices a chunk, groups the patch views into batches, and
//! runs each through the capability's prepare/run/finalize steps. A failed
//! batch is retried exactly once at half the batch size (when the batch
//! held more than one patch); a second failure is fatal for the run.

use crate::core::error::InferenceError;
use crate::core::types::ChunkBuffer;
use crate::infer::{InferenceCapability, PatchBatch, PatchResult};
use crate::plan::patches::{PatchDescriptor, PatchSlicer};
use log::{debug, warn};

/// Drives one chunk at a time through the inference capability.
///
/// The driver (and therefore the infer stage) holds the only reference to
/// the capability for the run's duration; no two chunks are inferred
/// concurrently on the same device.
pub struct InferenceDriver<'c> {
    capability: &'c dyn InferenceCapability,
    batch_size: usize,
    patch_size: u32,
}

impl<'c> InferenceDriver<'c> {
    /// Create a driver over the given capability.
    pub fn new(capability: &'c dyn InferenceCapability, batch_size: usize, patch_size: u32) -> Self {
        debug_assert!(batch_size > 0);
        Self {
            capability,
            batch_size,
            patch_size,
        }
    }

    /// Slice the chunk and infer every patch, returning results tagged with
    /// their placements. Patch order within the chunk is not guaranteed to
    /// survive downstream; placements are authoritative.
    pub fn infer_chunk(
        &self,
        chunk: &ChunkBuffer,
        slicer: &PatchSlicer,
    ) -> Result<Vec<PatchResult>, InferenceError> {
        let descriptors: Vec<PatchDescriptor<'_>> = slicer.slice(chunk).collect();
        if descriptors.is_empty() {
            debug!("{}: no patches to infer", chunk.window.id);
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(descriptors.len());
        for group in descriptors.chunks(self.batch_size) {
            match self.run_batch(group) {
                Ok(batch_results) => results.extend(batch_results),
                Err(err) if group.len() > 1 => {
                    // One retry at reduced batch size, then give up.
                    let reduced = group.len().div_ceil(2);
                    warn!(
                        "{}: batch of {} failed ({err}); retrying at batch size {reduced}",
                        chunk.window.id,
                        group.len()
                    );
                    for sub in group.chunks(reduced) {
                        results.extend(self.run_batch(sub)?);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }

    fn run_batch(
        &self,
        descriptors: &[PatchDescriptor<'_>],
    ) -> Result<Vec<PatchResult>, InferenceError> {
        let bands = descriptors[0].view.dim().0 as u32;
        let batch = PatchBatch {
            patches: descriptors,
            patch_size: self.patch_size,
            bands,
        };
        let prepared = self.capability.prepare(&batch)?;
        let raw = self.capability.run(prepared)?;
        let results = self.capability.finalize(raw)?;
        if results.len() != descriptors.len() {
            return Err(InferenceError::ShapeMismatch {
                expected: format!("{} patch results", descriptors.len()),
                got: format!("{}", results.len()),
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EdgePolicy;
    use crate::core::types::{ChunkId, ChunkWindow, Margin, RasterWindow};
    use crate::infer::{MeanProbe, PreparedBatch, RawBatchOutput};
    use ndarray::Array3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(height: u32, width: u32) -> ChunkBuffer {
        let window = ChunkWindow {
            id: ChunkId(0),
            valid: RasterWindow::new(0, 0, height, width),
            margin: Margin::default(),
        };
        ChunkBuffer::new(
            window,
            Array3::from_elem((1, height as usize, width as usize), 0.5),
        )
    }

    /// Fails the first `failures` calls to `run`, then behaves.
    struct FlakyCapability {
        inner: MeanProbe,
        failures: AtomicUsize,
    }

    impl InferenceCapability for FlakyCapability {
        fn name(&self) -> &str {
            "flaky"
        }
        fn receptive_field(&self) -> u32 {
            0
        }
        fn num_classes(&self) -> usize {
            self.inner.num_classes()
        }
        fn run(&self, batch: PreparedBatch) -> Result<RawBatchOutput, InferenceError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(InferenceError::CapabilityFailure {
                    batch_size: batch.data.dim().0,
                    message: "transient device error".to_string(),
                });
            }
            self.inner.run(batch)
        }
    }

    /// Always fails.
    struct BrokenCapability;

    impl InferenceCapability for BrokenCapability {
        fn name(&self) -> &str {
            "broken"
        }
        fn receptive_field(&self) -> u32 {
            0
        }
        fn num_classes(&self) -> usize {
            2
        }
        fn run(&self, batch: PreparedBatch) -> Result<RawBatchOutput, InferenceError> {
            Err(InferenceError::CapabilityFailure {
                batch_size: batch.data.dim().0,
                message: "device lost".to_string(),
            })
        }
    }

    #[test]
    fn infers_all_patches() {
        let probe = MeanProbe::new(2);
        let driver = InferenceDriver::new(&probe, 3, 4);
        let slicer = PatchSlicer::new(4, 4, EdgePolicy::PadWithMask);
        let buffer = chunk(8, 8);
        let results = driver.infer_chunk(&buffer, &slicer).unwrap();
        assert_eq!(results.len(), 4);
        for r in &results {
            assert_eq!(r.output.dim(), (2, 4, 4));
            assert!((r.output[[0, 0, 0]] - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn transient_failure_retries_at_reduced_batch() {
        let capability = FlakyCapability {
            inner: MeanProbe::new(2),
            failures: AtomicUsize::new(1),
        };
        let driver = InferenceDriver::new(&capability, 4, 4);
        let slicer = PatchSlicer::new(4, 4, EdgePolicy::PadWithMask);
        let buffer = chunk(8, 8);
        // First batch of 4 fails once; the two half-batches succeed.
        let results = driver.infer_chunk(&buffer, &slicer).unwrap();
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn persistent_failure_is_fatal() {
        let driver = InferenceDriver::new(&BrokenCapability, 4, 4);
        let slicer = PatchSlicer::new(4, 4, EdgePolicy::PadWithMask);
        let buffer = chunk(8, 8);
        assert!(matches!(
            driver.infer_chunk(&buffer, &slicer),
            Err(InferenceError::CapabilityFailure { .. })
        ));
    }

    #[test]
    fn single_patch_batch_fails_without_retry() {
        let driver = InferenceDriver::new(&BrokenCapability, 1, 4);
        let slicer = PatchSlicer::new(4, 4, EdgePolicy::PadWithMask);
        let buffer = chunk(4, 4);
        assert!(driver.infer_chunk(&buffer, &slicer).is_err());
    }
}
