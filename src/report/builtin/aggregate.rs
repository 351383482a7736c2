//! Whole-raster aggregate statistic reporter.
//!
//! Accumulates the mean class-probability vector over every valid pixel of
//! the run. Sums are kept in f64 so gigapixel accumulation stays accurate.
//! The result is one small JSON document, written on finish.

use crate::core::config::RunConfig;
use crate::core::error::{ReporterError, ReporterResult};
use crate::core::types::ChunkResult;
use crate::report::{Reporter, ReporterContext, ReporterSizing};
use log::info;
use serde_json::json;
use std::fs::File;
use std::path::PathBuf;

/// Running mean of class probabilities over the whole raster.
pub struct AggregateReporter {
    sums: Vec<f64>,
    total_pixels: u64,
    labels: Vec<String>,
    chunks_seen: usize,
    total_chunks: usize,
    out_path: Option<PathBuf>,
}

impl AggregateReporter {
    /// Create an unstarted reporter.
    pub fn new() -> Self {
        Self {
            sums: Vec::new(),
            total_pixels: 0,
            labels: Vec::new(),
            chunks_seen: 0,
            total_chunks: 0,
            out_path: None,
        }
    }

    /// The mean probability vector accumulated so far.
    pub fn means(&self) -> Vec<f64> {
        if self.total_pixels == 0 {
            return vec![0.0; self.sums.len()];
        }
        self.sums
            .iter()
            .map(|s| s / self.total_pixels as f64)
            .collect()
    }
}

impl Default for AggregateReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for AggregateReporter {
    fn name(&self) -> &str {
        "aggregate"
    }

    fn memory_multiplier(&self, _config: &RunConfig, _sizing: &ReporterSizing) -> f64 {
        // Constant-size accumulator; no per-pixel retention.
        0.0
    }

    fn on_start(&mut self, ctx: &ReporterContext) -> ReporterResult<()> {
        std::fs::create_dir_all(&ctx.output_dir)?;
        self.sums = vec![0.0; ctx.labels.len()];
        self.total_pixels = 0;
        self.chunks_seen = 0;
        self.total_chunks = ctx.total_chunks;
        self.labels = ctx.labels.clone();
        self.out_path = Some(ctx.output_dir.join("aggregate.json"));
        Ok(())
    }

    fn on_chunk(&mut self, chunk: &ChunkResult) -> ReporterResult<()> {
        let (classes, h, w) = chunk.probs.dim();
        if classes != self.sums.len() {
            return Err(ReporterError::ChunkRejected {
                reporter: "aggregate".to_string(),
                chunk: chunk.window.id,
                message: format!("expected {} classes, got {classes}", self.sums.len()),
            });
        }
        for (k, sum) in self.sums.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for v in chunk.probs.index_axis(ndarray::Axis(0), k).iter() {
                acc += *v as f64;
            }
            *sum += acc;
        }
        self.total_pixels += (h * w) as u64;
        self.chunks_seen += 1;
        Ok(())
    }

    fn on_finish(&mut self, ctx: &ReporterContext) -> ReporterResult<()> {
        let complete = self.chunks_seen == self.total_chunks;
        let means = self.means();
        if let Some(path) = &self.out_path {
            let doc = json!({
                "run_id": ctx.run_id,
                "capability": ctx.capability,
                "labels": self.labels,
                "global_probs": means,
                "pixels": self.total_pixels,
                "complete": complete,
            });
            let file = File::create(path)?;
            serde_json::to_writer_pretty(file, &doc)
                .map_err(|e| ReporterError::Encoding(e.to_string()))?;
            info!("aggregate: wrote {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChunkId, ChunkWindow, Margin, RasterExtent, RasterWindow, RunId};
    use ndarray::Array3;
    use tempfile::TempDir;

    fn context(dir: &TempDir, total_chunks: usize) -> ReporterContext {
        ReporterContext {
            run_id: RunId::new(),
            output_dir: dir.path().to_path_buf(),
            extent: RasterExtent::new(8, 8, 1),
            labels: vec!["a".to_string(), "b".to_string()],
            capability: "mean_probe".to_string(),
            total_chunks,
            chunk_size: 8,
            overlap_margin: 0,
        }
    }

    fn uniform_chunk(id: u64, h: u32, w: u32, p0: f32) -> ChunkResult {
        let window = ChunkWindow {
            id: ChunkId(id),
            valid: RasterWindow::new(0, 0, h, w),
            margin: Margin::default(),
        };
        let mut probs = Array3::<f32>::zeros((2, h as usize, w as usize));
        probs.slice_mut(ndarray::s![0, .., ..]).fill(p0);
        probs.slice_mut(ndarray::s![1, .., ..]).fill(1.0 - p0);
        ChunkResult {
            window,
            valid_window: window.valid,
            probs,
        }
    }

    #[test]
    fn means_are_pixel_weighted() {
        let dir = TempDir::new().unwrap();
        let mut reporter = AggregateReporter::new();
        reporter.on_start(&context(&dir, 2)).unwrap();
        // 16 pixels at 0.5 and 64 pixels at 1.0 for class 0.
        reporter.on_chunk(&uniform_chunk(0, 4, 4, 0.5)).unwrap();
        reporter.on_chunk(&uniform_chunk(1, 8, 8, 1.0)).unwrap();

        let means = reporter.means();
        let expected = (16.0 * 0.5 + 64.0 * 1.0) / 80.0;
        assert!((means[0] - expected).abs() < 1e-9);
        assert!((means[0] + means[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn writes_json_on_finish() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 1);
        let mut reporter = AggregateReporter::new();
        reporter.on_start(&ctx).unwrap();
        reporter.on_chunk(&uniform_chunk(0, 4, 4, 0.25)).unwrap();
        reporter.on_finish(&ctx).unwrap();

        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("aggregate.json")).unwrap())
                .unwrap();
        assert_eq!(doc["complete"], true);
        assert_eq!(doc["pixels"], 16);
        assert!((doc["global_probs"][0].as_f64().unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn class_count_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut reporter = AggregateReporter::new();
        reporter.on_start(&context(&dir, 1)).unwrap();

        let window = ChunkWindow {
            id: ChunkId(0),
            valid: RasterWindow::new(0, 0, 2, 2),
            margin: Margin::default(),
        };
        let bad = ChunkResult {
            window,
            valid_window: window.valid,
            probs: Array3::zeros((5, 2, 2)),
        };
        assert!(matches!(
            reporter.on_chunk(&bad),
            Err(ReporterError::ChunkRejected { .. })
        ));
    }
}
