//! Output reporters.
//!
//! A reporter is an output-sink plugin with a fixed lifecycle: `on_start`
//! once, `on_chunk` for every finished chunk in strictly increasing window
//! order, `on_finish` once — even when the run fails. Reporters also
//! declare a per-pixel memory cost that feeds the budget planner.

pub mod builtin;
pub mod registry;

pub use registry::{RegistryEntry, ReporterFactory, ReporterRegistry};

use crate::core::config::RunConfig;
use crate::core::error::ReporterResult;
use crate::core::types::{ChunkResult, RasterExtent, RunId};
use std::path::PathBuf;

/// Shared, read-only run metadata visible to every reporter.
#[derive(Debug, Clone)]
pub struct ReporterContext {
    /// The run this context belongs to.
    pub run_id: RunId,
    /// Directory reporters write into.
    pub output_dir: PathBuf,
    /// Full raster dimensions and geospatial profile.
    pub extent: RasterExtent,
    /// Class labels, index-aligned with probability planes.
    pub labels: Vec<String>,
    /// Name of the active inference capability.
    pub capability: String,
    /// Total chunks the planner will emit; lets sinks flag incomplete runs.
    pub total_chunks: usize,
    /// Planned chunk side length.
    pub chunk_size: u32,
    /// Overlap margin in effect.
    pub overlap_margin: u32,
}

/// Inputs to a reporter's memory declaration.
#[derive(Debug, Clone, Copy)]
pub struct ReporterSizing {
    /// Number of output classes.
    pub num_classes: usize,
    /// Source raster bands.
    pub bands: u32,
}

/// An output sink with a declared lifecycle and per-pixel memory cost.
///
/// `on_chunk` calls arrive in strictly increasing window order and may be
/// arbitrarily spaced in time. A failed call marks the run degraded but
/// does not stop other reporters, nor later chunks for this one.
pub trait Reporter: Send {
    /// Registry name of this reporter.
    fn name(&self) -> &str;

    /// Bytes this reporter retains per chunk pixel while handling a chunk.
    /// A pure function of configuration; queried before the first chunk.
    fn memory_multiplier(&self, config: &RunConfig, sizing: &ReporterSizing) -> f64;

    /// Called once before the first chunk.
    fn on_start(&mut self, ctx: &ReporterContext) -> ReporterResult<()>;

    /// Called once per finished chunk, in planner order.
    fn on_chunk(&mut self, chunk: &ChunkResult) -> ReporterResult<()>;

    /// Called once after the last chunk, or after a failure. Teardown must
    /// be safe even if `on_chunk` was never called.
    fn on_finish(&mut self, ctx: &ReporterContext) -> ReporterResult<()>;
}
