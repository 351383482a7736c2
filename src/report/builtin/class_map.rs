//! Class / confidence / entropy raster reporter.
//!
//! Streams three derived rasters to disk as headerless row-major binary
//! files plus a JSON sidecar describing them: the argmax class index (u8),
//! the winning probability (f32) and the Shannon entropy of the class
//! distribution (f32). Chunks arrive in strictly increasing window order,
//! so each window is written with per-row seeks into pre-sized files.

use crate::core::config::RunConfig;
use crate::core::error::{ReporterError, ReporterResult};
use crate::core::types::ChunkResult;
use crate::report::{Reporter, ReporterContext, ReporterSizing};
use log::{info, warn};
use ndarray::Array2;
use serde_json::json;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

struct OpenOutputs {
    class: File,
    confidence: File,
    entropy: File,
}

/// Streams per-chunk class/confidence/entropy windows into binary rasters.
pub struct ClassMapReporter {
    outputs: Option<OpenOutputs>,
    width: u64,
    height: u64,
    labels: Vec<String>,
    chunks_seen: usize,
    total_chunks: usize,
    sidecar_path: Option<PathBuf>,
}

impl ClassMapReporter {
    /// Create an unstarted reporter.
    pub fn new() -> Self {
        Self {
            outputs: None,
            width: 0,
            height: 0,
            labels: Vec::new(),
            chunks_seen: 0,
            total_chunks: 0,
            sidecar_path: None,
        }
    }

    fn derive_planes(&self, chunk: &ChunkResult) -> (Array2<u8>, Array2<f32>, Array2<f32>) {
        let (classes, h, w) = chunk.probs.dim();
        let mut class = Array2::<u8>::zeros((h, w));
        let mut confidence = Array2::<f32>::zeros((h, w));
        let mut entropy = Array2::<f32>::zeros((h, w));

        for r in 0..h {
            for c in 0..w {
                let mut best = 0usize;
                let mut best_p = f32::NEG_INFINITY;
                let mut ent = 0.0f32;
                for k in 0..classes {
                    let p = chunk.probs[[k, r, c]];
                    if p > best_p {
                        best_p = p;
                        best = k;
                    }
                    if p > 0.0 {
                        ent -= p * p.ln();
                    }
                }
                class[[r, c]] = best as u8;
                confidence[[r, c]] = best_p;
                entropy[[r, c]] = ent;
            }
        }
        (class, confidence, entropy)
    }

}

impl Default for ClassMapReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ClassMapReporter {
    fn name(&self) -> &str {
        "class_map"
    }

    fn memory_multiplier(&self, _config: &RunConfig, _sizing: &ReporterSizing) -> f64 {
        // Derived planes per chunk pixel: class u8 + confidence f32 + entropy f32.
        9.0
    }

    fn on_start(&mut self, ctx: &ReporterContext) -> ReporterResult<()> {
        std::fs::create_dir_all(&ctx.output_dir)?;
        self.width = ctx.extent.width as u64;
        self.height = ctx.extent.height as u64;
        self.labels = ctx.labels.clone();
        self.total_chunks = ctx.total_chunks;
        self.chunks_seen = 0;

        let class = File::create(ctx.output_dir.join("class.u8"))?;
        class.set_len(self.width * self.height)?;
        let confidence = File::create(ctx.output_dir.join("confidence.f32"))?;
        confidence.set_len(self.width * self.height * 4)?;
        let entropy = File::create(ctx.output_dir.join("entropy.f32"))?;
        entropy.set_len(self.width * self.height * 4)?;

        self.sidecar_path = Some(ctx.output_dir.join("class_map.json"));
        self.outputs = Some(OpenOutputs {
            class,
            confidence,
            entropy,
        });
        info!(
            "class_map: writing {}x{} rasters to {}",
            self.width,
            self.height,
            ctx.output_dir.display()
        );
        Ok(())
    }

    fn on_chunk(&mut self, chunk: &ChunkResult) -> ReporterResult<()> {
        let (class, confidence, entropy) = self.derive_planes(chunk);
        let row = chunk.valid_window.row_start as u64;
        let col = chunk.valid_window.col_start as u64;

        let outputs = self.outputs.as_mut().ok_or_else(|| ReporterError::ChunkRejected {
            reporter: "class_map".to_string(),
            chunk: chunk.window.id,
            message: "reporter not started".to_string(),
        })?;

        // Split borrows: write_window takes &self fields by value.
        let width = self.width;
        let write = |file: &mut File, bytes: &[u8], r: u64, row_len: u64, item: u64| -> std::io::Result<()> {
            let offset = ((row + r) * width + col) * item;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&bytes[(r * row_len * item) as usize..((r + 1) * row_len * item) as usize])
        };

        let (h, w) = class.dim();
        let class_bytes: &[u8] = class.as_slice().expect("row-major plane");
        let conf_bytes: &[u8] = bytemuck::cast_slice(confidence.as_slice().expect("row-major plane"));
        let ent_bytes: &[u8] = bytemuck::cast_slice(entropy.as_slice().expect("row-major plane"));

        for r in 0..h as u64 {
            write(&mut outputs.class, class_bytes, r, w as u64, 1)?;
            write(&mut outputs.confidence, conf_bytes, r, w as u64, 4)?;
            write(&mut outputs.entropy, ent_bytes, r, w as u64, 4)?;
        }

        self.chunks_seen += 1;
        Ok(())
    }

    fn on_finish(&mut self, ctx: &ReporterContext) -> ReporterResult<()> {
        if let Some(outputs) = self.outputs.as_mut() {
            outputs.class.flush()?;
            outputs.confidence.flush()?;
            outputs.entropy.flush()?;
        }
        let complete = self.chunks_seen == self.total_chunks;
        if !complete {
            warn!(
                "class_map: run incomplete, {}/{} chunks written",
                self.chunks_seen, self.total_chunks
            );
        }
        if let Some(path) = &self.sidecar_path {
            let sidecar = json!({
                "run_id": ctx.run_id,
                "width": self.width,
                "height": self.height,
                "classes": self.labels,
                "complete": complete,
                "chunks_written": self.chunks_seen,
                "chunks_total": self.total_chunks,
                "geo": ctx.extent.geo,
                "files": {
                    "class": { "path": "class.u8", "dtype": "u8" },
                    "confidence": { "path": "confidence.f32", "dtype": "f32" },
                    "entropy": { "path": "entropy.f32", "dtype": "f32" },
                },
            });
            let file = File::create(path)?;
            serde_json::to_writer_pretty(file, &sidecar)
                .map_err(|e| ReporterError::Encoding(e.to_string()))?;
        }
        self.outputs = None;
        Ok(())
    }
}
