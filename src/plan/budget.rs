//! Memory budget planner.
//!
//! Solves for the largest square chunk whose margin-expanded footprint,
//! costed at the combined model + reporter bytes-per-pixel and scaled by
//! the safety factor, still fits under the configured ceiling. Purely
//! arithmetic; the ceiling is a sizing contract, not a runtime limit.

use crate::core::error::{PlanError, PlanResult};
use log::{debug, info};

/// The per-run memory budget, computed once and never mutated mid-chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBudget {
    /// Hard ceiling in bytes.
    pub ceiling_bytes: u64,
    /// Bytes per chunk pixel retained by the inference capability's output.
    pub model_bytes_per_pixel: f64,
    /// Sum of the active reporters' declared bytes per pixel.
    pub reporter_bytes_per_pixel: f64,
    /// Patch side length.
    pub patch_size: u32,
    /// Patch stride.
    pub stride: u32,
    /// Inference batch size.
    pub batch_size: usize,
    /// Multiplier applied to the per-pixel cost.
    pub safety_factor: f64,
}

impl MemoryBudget {
    /// Assemble a budget from its inputs, validating them.
    pub fn new(
        ceiling_bytes: u64,
        model_bytes_per_pixel: f64,
        reporter_bytes_per_pixel: f64,
        patch_size: u32,
        stride: u32,
        batch_size: usize,
        safety_factor: f64,
    ) -> PlanResult<Self> {
        if model_bytes_per_pixel <= 0.0 {
            return Err(PlanError::InvalidBudget {
                reason: format!(
                    "model bytes-per-pixel must be positive, got {model_bytes_per_pixel}"
                ),
            });
        }
        if reporter_bytes_per_pixel < 0.0 {
            return Err(PlanError::InvalidBudget {
                reason: format!(
                    "reporter bytes-per-pixel must be non-negative, got {reporter_bytes_per_pixel}"
                ),
            });
        }
        if stride == 0 || patch_size == 0 || stride > patch_size {
            return Err(PlanError::InvalidBudget {
                reason: format!("invalid patch geometry: patch {patch_size}, stride {stride}"),
            });
        }
        if safety_factor < 1.0 {
            return Err(PlanError::InvalidBudget {
                reason: format!("safety factor must be >= 1.0, got {safety_factor}"),
            });
        }
        Ok(Self {
            ceiling_bytes,
            model_bytes_per_pixel,
            reporter_bytes_per_pixel,
            patch_size,
            stride,
            batch_size,
            safety_factor,
        })
    }

    /// Combined per-pixel cost.
    pub fn bytes_per_pixel(&self) -> f64 {
        self.model_bytes_per_pixel + self.reporter_bytes_per_pixel
    }

    /// Projected peak footprint of a chunk with the given valid side and
    /// symmetric margin.
    pub fn projected_peak(&self, side: u32, margin: u32) -> u64 {
        let full = side as u64 + 2 * margin as u64;
        let pixels = (full * full) as f64;
        (pixels * self.bytes_per_pixel() * self.safety_factor).ceil() as u64
    }

    /// Solve for the largest chunk side length that fits the ceiling.
    ///
    /// The side is rounded down to a stride multiple so chunks slice into
    /// whole patch steps; no more conservative rounding is applied. Fails
    /// with [`PlanError::ResourceExhausted`] if even a single-patch chunk
    /// would exceed the ceiling.
    pub fn plan_chunk_size(&self, margin: u32) -> PlanResult<u32> {
        let cost = self.bytes_per_pixel() * self.safety_factor;
        let max_pixels = self.ceiling_bytes as f64 / cost;
        let full_side = max_pixels.sqrt().floor() as u64;
        debug!(
            "budget solve: {:.2} B/px (x{:.2} safety), ceiling {} B -> full side {} px",
            self.bytes_per_pixel(),
            self.safety_factor,
            self.ceiling_bytes,
            full_side
        );

        let usable = full_side.saturating_sub(2 * margin as u64);
        let aligned = (usable / self.stride as u64) * self.stride as u64;

        if aligned < self.patch_size as u64 {
            return Err(PlanError::ResourceExhausted {
                ceiling_bytes: self.ceiling_bytes,
                bytes_per_pixel: self.bytes_per_pixel(),
                min_side: self.patch_size,
            });
        }

        let side = aligned as u32;
        info!(
            "planned chunk size {side} px (margin {margin}, projected peak {} B of {} B ceiling)",
            self.projected_peak(side, margin),
            self.ceiling_bytes
        );
        Ok(side)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // The planner never exceeds the ceiling, and is maximal: the next
        // stride-aligned candidate would not fit.
        #[test]
        fn never_exceeds_and_is_maximal(
            ceiling_mb in 1u64..2048,
            bpp in 1.0f64..64.0,
            margin in 0u32..256,
        ) {
            let ceiling = ceiling_mb * 1024 * 1024;
            let b = MemoryBudget::new(ceiling, bpp, 0.0, 128, 64, 8, 1.0).unwrap();
            match b.plan_chunk_size(margin) {
                Ok(side) => {
                    prop_assert!(b.projected_peak(side, margin) <= ceiling);
                    prop_assert!(b.projected_peak(side + b.stride, margin) > ceiling);
                    prop_assert!(side >= b.patch_size);
                    prop_assert_eq!(side % b.stride, 0);
                }
                Err(PlanError::ResourceExhausted { .. }) => {
                    // Then even the minimum viable chunk must not fit.
                    prop_assert!(b.projected_peak(b.patch_size, margin) > ceiling);
                }
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }
    }
}
