//! # Rasterflow - Streaming Tiled Inference
//!
//! Rasterflow streams gigapixel rasters through a pluggable inference
//! capability and pluggable output reporters without ever materializing the
//! full image in memory. The core is a tiling-and-reconstruction engine:
//! it partitions the raster into memory-safe chunks, slices each chunk into
//! fixed-size overlapping patches, batches those patches for inference,
//! stitches the overlapping outputs into an artifact-free per-chunk result
//! and streams it to output sinks, while auto-sizing chunks from a memory
//! budget.
//!
//! ## Features
//!
//! - **Bounded memory**: chunk sizes are solved from a hard ceiling and the
//!   declared per-pixel costs of the model and every active reporter
//! - **Boundary-free mosaics**: overlap margins sized to the model's
//!   receptive field, with deterministic overlap blending
//! - **Zero-copy patching**: patches are borrowed views into the chunk
//!   buffer, never copies
//! - **Pipelined stages**: read, infer, stitch and report run concurrently
//!   over bounded queues with backpressure and ordered delivery
//! - **Pluggable boundaries**: inference capabilities and reporters are
//!   trait objects behind small, fixed contracts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rasterflow::prelude::*;
//!
//! let source = MemoryRasterSource::from_fn(4096, 4096, 1, |_, r, c| {
//!     ((r + c) % 255) as f32 / 255.0
//! });
//! let capability = MeanProbe::new(2);
//!
//! let config = RunConfig::new()
//!     .with_memory_ceiling_mb(512)
//!     .with_patch_geometry(128, 64)
//!     .with_output_dir("out");
//!
//! let registry = ReporterRegistry::with_builtins();
//! let mut reporters = registry.create_set(&config.reporters)?;
//!
//! let summary = PipelineOrchestrator::new(config)
//!     .run(&source, &capability, &mut reporters)?;
//! println!("{} chunks in {} ms", summary.chunks_processed, summary.duration_ms);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: geometry/buffer types, errors, layered configuration
//! - [`io`]: the raster source boundary
//! - [`plan`]: memory budget, chunk grid and patch slicer
//! - [`infer`]: the inference capability contract and its driver
//! - [`stitch`]: the overlap resolver
//! - [`pipeline`]: the staged orchestrator and progress tracking
//! - [`report`]: the reporter contract, registry and built-in sinks
//!
//! ## Plugging in a model
//!
//! Implement [`infer::InferenceCapability`]: declare the receptive field,
//! class count and per-pixel output cost, then provide `run` (and override
//! `prepare`/`finalize` if the default dense batch layout does not fit).
//! Reporters implement [`report::Reporter`] and register in a
//! [`report::ReporterRegistry`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod infer;
pub mod io;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod stitch;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use rasterflow::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{
        ChunkBuffer, ChunkId, ChunkResult, ChunkWindow, GeoProfile, Margin, RasterExtent,
        RasterWindow, RunId,
    };

    // Configuration
    pub use crate::core::config::{
        ConfigLayer, ConfigPatch, ConfigStack, EdgePolicy, OverlapPolicy, RunConfig,
    };

    // Errors
    pub use crate::core::error::{
        ConfigError, EngineError, EngineResult, GeometryError, InferenceError, PlanError,
        ReporterError, SourceError,
    };

    // Sources
    pub use crate::io::{MemoryRasterSource, RasterSource};

    // Planning
    pub use crate::plan::budget::MemoryBudget;
    pub use crate::plan::grid::ChunkGrid;
    pub use crate::plan::patches::{PatchDescriptor, PatchPlacement, PatchSlicer};

    // Inference
    pub use crate::infer::{
        InferenceCapability, InferenceDriver, MeanProbe, PatchBatch, PatchResult, PreparedBatch,
        RawBatchOutput,
    };

    // Stitching
    pub use crate::stitch::Stitcher;

    // Pipeline
    pub use crate::pipeline::orchestrator::{PipelineOrchestrator, RunSummary, StageTimings};
    pub use crate::pipeline::progress::{ProgressEvent, ProgressTracker};

    // Reporters
    pub use crate::report::builtin::{AggregateReporter, ClassMapReporter, PreviewReporter};
    pub use crate::report::{Reporter, ReporterContext, ReporterRegistry, ReporterSizing};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn version_constants() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "rasterflow");
    }

    #[test]
    fn registry_builtins_match_default_config() {
        let registry = ReporterRegistry::with_builtins();
        let config = RunConfig::default();
        for name in &config.reporters {
            assert!(registry.contains(name), "missing builtin '{name}'");
        }
    }
}
