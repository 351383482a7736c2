//! Pipeline orchestrator.
//!
//! Four stages — read, infer, stitch, report — run as scoped threads
//! connected by bounded channels. Each stage is single-threaded; the only
//! shared state is the channel contents, the cancellation flag and the
//! first-error slot. Backpressure from any stage blocks upstream
//! production, bounding peak memory to roughly one in-flight chunk per
//! queue slot. Chunks reach the report stage in planner order.

use crate::core::config::RunConfig;
use crate::core::error::{EngineError, EngineResult, GeometryError};
use crate::core::types::{ChunkBuffer, ChunkId, ChunkResult, ChunkWindow, RunId};
use crate::infer::{InferenceCapability, InferenceDriver, PatchResult};
use crate::io::RasterSource;
use crate::pipeline::progress::{ProgressCallback, ProgressEvent, ProgressTracker};
use crate::plan::budget::MemoryBudget;
use crate::plan::grid::ChunkGrid;
use crate::plan::patches::PatchSlicer;
use crate::report::{Reporter, ReporterContext, ReporterSizing};
use crate::stitch::Stitcher;
use crossbeam::channel::bounded;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Wall-clock busy time per stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageTimings {
    /// Time the read stage spent in source reads.
    pub read_ms: u64,
    /// Time the infer stage spent slicing and running the capability.
    pub infer_ms: u64,
    /// Time the stitch stage spent merging and cropping.
    pub stitch_ms: u64,
    /// Time the report stage spent in reporter dispatch.
    pub report_ms: u64,
}

/// Machine-readable summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: RunId,
    /// Name of the inference capability used.
    pub capability: String,
    /// Chunks the planner emitted.
    pub chunks_total: usize,
    /// Chunks fully dispatched to reporters.
    pub chunks_processed: usize,
    /// Patches inferred across all chunks.
    pub patches_processed: usize,
    /// Planned chunk side length in pixels.
    pub chunk_size: u32,
    /// Overlap margin in effect.
    pub overlap_margin: u32,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Whether any reporter failed along the way.
    pub degraded: bool,
    /// Number of failed reporter calls.
    pub reporter_failures: usize,
    /// Per-stage busy time.
    pub stage_busy: StageTimings,
}

/// Runs the read -> infer -> stitch -> report pipeline.
pub struct PipelineOrchestrator {
    config: RunConfig,
    progress: Option<Arc<ProgressCallback>>,
    cancel: Arc<AtomicBool>,
}

impl PipelineOrchestrator {
    /// Create an orchestrator over a resolved run configuration.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(Box::new(callback)));
        self
    }

    /// External stop signal. Setting it cancels the run; the pipeline
    /// drains, runs reporter teardown and returns [`EngineError::Cancelled`].
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Process the whole raster.
    ///
    /// Reporter lifecycle is bracketed around the pipeline: `on_start`
    /// before the first chunk, `on_finish` after the last — or after a
    /// failure. The first fatal error cancels all stages and is returned
    /// as the run's single terminal cause.
    pub fn run(
        &self,
        source: &dyn RasterSource,
        capability: &dyn InferenceCapability,
        reporters: &mut [Box<dyn Reporter>],
    ) -> EngineResult<RunSummary> {
        self.config.validate()?;
        let started = Instant::now();
        let run_id = RunId::new();
        let extent = source.extent().clone();

        let margin = self
            .config
            .overlap_margin
            .unwrap_or_else(|| capability.receptive_field());

        // Budget: capability output cost plus every active reporter's
        // declared cost. Surfaces ResourceExhausted before any chunk work.
        let sizing = ReporterSizing {
            num_classes: capability.num_classes(),
            bands: extent.bands,
        };
        let reporter_bpp: f64 = reporters
            .iter()
            .map(|r| r.memory_multiplier(&self.config, &sizing))
            .sum();
        let chunk_size = match self.config.chunk_size {
            Some(side) => {
                info!("using configured chunk size {side} px");
                side
            }
            None => {
                let budget = MemoryBudget::new(
                    self.config.memory_ceiling_bytes,
                    capability.output_bytes_per_pixel(),
                    reporter_bpp,
                    self.config.patch_size,
                    self.config.stride,
                    self.config.batch_size,
                    self.config.safety_factor,
                )?;
                budget.plan_chunk_size(margin)?
            }
        };

        let grid = ChunkGrid::new(&extent, chunk_size, margin)?;
        let total_chunks = grid.chunk_count();
        info!(
            "{run_id}: {}x{} raster, {total_chunks} chunks of {chunk_size} px (margin {margin})",
            extent.width, extent.height
        );

        let context = ReporterContext {
            run_id,
            output_dir: self.config.output_dir.clone(),
            extent: extent.clone(),
            labels: capability.labels(),
            capability: capability.name().to_string(),
            total_chunks,
            chunk_size,
            overlap_margin: margin,
        };

        let mut tracker = ProgressTracker::new(total_chunks);
        if let Some(callback) = &self.progress {
            let callback = callback.clone();
            tracker = tracker.with_callback(Box::new(move |event| callback(event)));
        }
        tracker.start();
        let tracker = &tracker;

        let degraded = AtomicBool::new(false);
        let reporter_failures = AtomicUsize::new(0);

        for reporter in reporters.iter_mut() {
            if let Err(e) = reporter.on_start(&context) {
                warn!("reporter '{}' failed to start: {e}", reporter.name());
                degraded.store(true, Ordering::Relaxed);
                reporter_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        let cancel = &self.cancel;
        let first_error: Mutex<Option<EngineError>> = Mutex::new(None);
        let record_error = |err: EngineError| {
            let mut slot = first_error.lock();
            if slot.is_none() {
                error!("pipeline failure: {err}");
                tracker.report_error(None, err.to_string());
                *slot = Some(err);
            }
            cancel.store(true, Ordering::Relaxed);
        };

        let patches_processed = AtomicUsize::new(0);
        let chunks_processed = AtomicUsize::new(0);
        let read_ms = AtomicU64::new(0);
        let infer_ms = AtomicU64::new(0);
        let stitch_ms = AtomicU64::new(0);
        let report_ms = AtomicU64::new(0);

        let capacity = self.config.queue_capacity;
        let (read_tx, read_rx) = bounded::<ChunkBuffer>(capacity);
        let (infer_tx, infer_rx) = bounded::<(ChunkWindow, Vec<PatchResult>)>(capacity);
        let (stitch_tx, stitch_rx) = bounded::<ChunkResult>(capacity);

        let slicer = PatchSlicer::new(
            self.config.patch_size,
            self.config.stride,
            self.config.edge_policy,
        );
        let stitcher = Stitcher::new(self.config.overlap_policy, capability.num_classes());
        let driver = InferenceDriver::new(capability, self.config.batch_size, self.config.patch_size);

        thread::scope(|scope| {
            // Read: source windows in planner order.
            let windows = grid.windows();
            scope.spawn(|| {
                let read_tx = read_tx;
                for window in windows {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let t = Instant::now();
                    match source.read_window(&window) {
                        Ok(buffer) => {
                            read_ms.fetch_add(t.elapsed().as_millis() as u64, Ordering::Relaxed);
                            tracker.chunk_read(window.id);
                            if read_tx.send(buffer).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            record_error(EngineError::Source(e));
                            break;
                        }
                    }
                }
            });

            // Infer: the only stage that touches the capability. The
            // receiver is moved in so an early exit disconnects upstream.
            scope.spawn(|| {
                let infer_tx = infer_tx;
                let read_rx = read_rx;
                for buffer in read_rx.iter() {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let t = Instant::now();
                    match driver.infer_chunk(&buffer, &slicer) {
                        Ok(results) => {
                            let elapsed = t.elapsed().as_millis() as u64;
                            infer_ms.fetch_add(elapsed, Ordering::Relaxed);
                            patches_processed.fetch_add(results.len(), Ordering::Relaxed);
                            tracker.chunk_inferred(buffer.window.id, results.len(), elapsed);
                            // The pixel buffer is released here; only the
                            // patch outputs travel on.
                            let window = buffer.window;
                            drop(buffer);
                            if infer_tx.send((window, results)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            record_error(EngineError::Inference(e));
                            break;
                        }
                    }
                }
            });

            // Stitch: merge and crop. Drains whatever upstream produced;
            // cancellation stops the producers, not work already in flight.
            scope.spawn(|| {
                let stitch_tx = stitch_tx;
                let infer_rx = infer_rx;
                for (window, results) in infer_rx.iter() {
                    let t = Instant::now();
                    match stitcher.stitch(&window, results) {
                        Ok(result) => {
                            stitch_ms.fetch_add(t.elapsed().as_millis() as u64, Ordering::Relaxed);
                            tracker.chunk_stitched(window.id);
                            if stitch_tx.send(result).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            record_error(EngineError::Geometry(e));
                            break;
                        }
                    }
                }
            });

            // Report: ordered dispatch to every sink. Also drains.
            scope.spawn(|| {
                let stitch_rx = stitch_rx;
                let mut expected = 0u64;
                for chunk in stitch_rx.iter() {
                    if chunk.window.id != ChunkId(expected) {
                        record_error(EngineError::Geometry(GeometryError::WindowOrder {
                            expected: ChunkId(expected),
                            got: chunk.window.id,
                        }));
                        break;
                    }
                    let t = Instant::now();
                    for reporter in reporters.iter_mut() {
                        if let Err(e) = reporter.on_chunk(&chunk) {
                            warn!("reporter '{}' rejected {}: {e}", reporter.name(), chunk.window.id);
                            degraded.store(true, Ordering::Relaxed);
                            reporter_failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    report_ms.fetch_add(t.elapsed().as_millis() as u64, Ordering::Relaxed);
                    chunks_processed.fetch_add(1, Ordering::Relaxed);
                    tracker.chunk_reported(chunk.window.id);
                    expected += 1;
                }
            });
        });

        // Teardown runs regardless of how the pipeline ended.
        for reporter in reporters.iter_mut() {
            if let Err(e) = reporter.on_finish(&context) {
                warn!("reporter '{}' failed to finish: {e}", reporter.name());
                degraded.store(true, Ordering::Relaxed);
                reporter_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        let degraded = degraded.load(Ordering::Relaxed);
        if let Some(err) = first_error.into_inner() {
            tracker.complete(degraded);
            return Err(err);
        }
        if self.cancel.load(Ordering::Relaxed) {
            tracker.complete(degraded);
            return Err(EngineError::Cancelled);
        }

        let summary = RunSummary {
            run_id,
            capability: capability.name().to_string(),
            chunks_total: total_chunks,
            chunks_processed: chunks_processed.load(Ordering::Relaxed),
            patches_processed: patches_processed.load(Ordering::Relaxed),
            chunk_size,
            overlap_margin: margin,
            duration_ms: started.elapsed().as_millis() as u64,
            degraded,
            reporter_failures: reporter_failures.load(Ordering::Relaxed),
            stage_busy: StageTimings {
                read_ms: read_ms.load(Ordering::Relaxed),
                infer_ms: infer_ms.load(Ordering::Relaxed),
                stitch_ms: stitch_ms.load(Ordering::Relaxed),
                report_ms: report_ms.load(Ordering::Relaxed),
            },
        };
        tracker.complete(degraded);
        info!(
            "{run_id}: processed {}/{} chunks in {} ms{}",
            summary.chunks_processed,
            summary.chunks_total,
            summary.duration_ms,
            if degraded { " (degraded)" } else { "" }
        );
        Ok(summary)
    }
}
