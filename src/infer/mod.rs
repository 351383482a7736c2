//! The inference capability boundary.
//!
//! The engine never defines models; it drives an external capability
//! through a fixed prepare/run/finalize contract. The capability also
//! declares the geometry facts the planners need: its receptive field
//! (which sets the minimum overlap margin) and its per-pixel output cost
//! (which feeds the memory budget).

pub mod driver;
pub mod probe;

pub use driver::InferenceDriver;
pub use probe::MeanProbe;

use crate::core::error::InferenceError;
use crate::plan::patches::{PatchDescriptor, PatchPlacement};
use ndarray::{Array3, Array4};

/// A batch of patch views handed to the capability.
pub struct PatchBatch<'s, 'd> {
    /// The patches, in slicer order.
    pub patches: &'s [PatchDescriptor<'d>],
    /// Declared (padded) patch side length.
    pub patch_size: u32,
    /// Bands per patch.
    pub bands: u32,
}

impl<'s, 'd> PatchBatch<'s, 'd> {
    /// Number of patches in the batch.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// A model-ready batch: one contiguous `(n, bands, size, size)` array plus
/// the placements of its rows.
pub struct PreparedBatch {
    /// Stacked patch data; padded extents are zero-filled.
    pub data: Array4<f32>,
    /// Placement of each row of `data`.
    pub placements: Vec<PatchPlacement>,
}

/// The capability's raw output for one batch: `(n, classes, size, size)`.
pub struct RawBatchOutput {
    /// Per-patch class maps.
    pub data: Array4<f32>,
    /// Placement of each row of `data`, carried through from the input.
    pub placements: Vec<PatchPlacement>,
}

/// One patch's standardized result: `(classes, size, size)` scores tagged
/// with the patch's placement. Consumed exactly once by the stitcher.
#[derive(Debug)]
pub struct PatchResult {
    /// Where the patch sits in its chunk.
    pub placement: PatchPlacement,
    /// Class scores for the full (padded) patch extent.
    pub output: Array3<f32>,
}

/// An external inference capability.
///
/// `prepare` and `finalize` have default implementations covering the
/// common dense case (stack views into a contiguous batch, split the output
/// back per patch); capabilities with their own layout override them.
pub trait InferenceCapability: Send + Sync {
    /// Capability name, for logs and run summaries.
    fn name(&self) -> &str;

    /// Minimum overlap margin so a pixel's prediction is unaffected by tile
    /// boundaries.
    fn receptive_field(&self) -> u32;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Class labels, index-aligned with the output planes.
    fn labels(&self) -> Vec<String> {
        (0..self.num_classes()).map(|i| format!("class_{i}")).collect()
    }

    /// Bytes of output retained per chunk pixel; feeds the memory budget.
    fn output_bytes_per_pixel(&self) -> f64 {
        self.num_classes() as f64 * std::mem::size_of::<f32>() as f64
    }

    /// Turn patch views into a model-ready batch.
    fn prepare(&self, batch: &PatchBatch<'_, '_>) -> Result<PreparedBatch, InferenceError> {
        stack_batch(batch)
    }

    /// Run the model on a prepared batch.
    fn run(&self, batch: PreparedBatch) -> Result<RawBatchOutput, InferenceError>;

    /// Standardize raw output into per-patch results.
    fn finalize(&self, raw: RawBatchOutput) -> Result<Vec<PatchResult>, InferenceError> {
        split_batch_output(raw, self.num_classes())
    }
}

/// Stack patch views into a zero-padded contiguous `(n, bands, p, p)` batch.
pub fn stack_batch(batch: &PatchBatch<'_, '_>) -> Result<PreparedBatch, InferenceError> {
    if batch.is_empty() {
        return Err(InferenceError::EmptyBatch);
    }
    let n = batch.len();
    let p = batch.patch_size as usize;
    let bands = batch.bands as usize;
    let mut data = Array4::<f32>::zeros((n, bands, p, p));
    let mut placements = Vec::with_capacity(n);
    for (i, patch) in batch.patches.iter().enumerate() {
        let (vb, vh, vw) = patch.view.dim();
        if vb != bands {
            return Err(InferenceError::ShapeMismatch {
                expected: format!("{bands} bands"),
                got: format!("{vb} bands"),
            });
        }
        data.slice_mut(ndarray::s![i, .., ..vh, ..vw])
            .assign(&patch.view);
        placements.push(patch.placement);
    }
    Ok(PreparedBatch { data, placements })
}

/// Split a `(n, classes, p, p)` raw output into per-patch results.
pub fn split_batch_output(
    raw: RawBatchOutput,
    num_classes: usize,
) -> Result<Vec<PatchResult>, InferenceError> {
    let shape = raw.data.dim();
    if shape.0 != raw.placements.len() || shape.1 != num_classes {
        return Err(InferenceError::ShapeMismatch {
            expected: format!("({}, {num_classes}, _, _)", raw.placements.len()),
            got: format!("{shape:?}"),
        });
    }
    let results = raw
        .placements
        .iter()
        .enumerate()
        .map(|(i, &placement)| PatchResult {
            placement,
            output: raw.data.index_axis(ndarray::Axis(0), i).to_owned(),
        })
        .collect();
    Ok(results)
}
