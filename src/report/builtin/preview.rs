//! Low-resolution preview reporter.
//!
//! Assembles a downsampled color rendering of the class map incrementally,
//! one chunk at a time, so the full-resolution mosaic never has to be
//! re-read. Nearest-neighbor sampling (order 0) keeps class boundaries
//! crisp. The preview is written as a PNG on finish.

use crate::core::config::RunConfig;
use crate::core::error::{ReporterError, ReporterResult};
use crate::core::types::ChunkResult;
use crate::report::{Reporter, ReporterContext, ReporterSizing};
use log::info;
use std::path::PathBuf;

/// Default downscale factor.
pub const DEFAULT_DOWNSCALE: u32 = 8;

/// Fixed categorical palette, cycled when there are more classes.
const PALETTE: [[u8; 3]; 16] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
    [174, 199, 232],
    [255, 187, 120],
    [152, 223, 138],
    [255, 152, 150],
    [197, 176, 213],
    [196, 156, 148],
];

/// Incrementally assembled class-map preview.
pub struct PreviewReporter {
    downscale: u32,
    preview_width: u32,
    preview_height: u32,
    rgb: Vec<u8>,
    out_path: Option<PathBuf>,
}

impl PreviewReporter {
    /// Create a reporter with the default downscale factor.
    pub fn new() -> Self {
        Self::with_downscale(DEFAULT_DOWNSCALE)
    }

    /// Create a reporter sampling every `downscale`-th pixel.
    pub fn with_downscale(downscale: u32) -> Self {
        Self {
            downscale: downscale.max(1),
            preview_width: 0,
            preview_height: 0,
            rgb: Vec::new(),
            out_path: None,
        }
    }
}

impl Default for PreviewReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for PreviewReporter {
    fn name(&self) -> &str {
        "preview"
    }

    fn memory_multiplier(&self, _config: &RunConfig, _sizing: &ReporterSizing) -> f64 {
        // Three bytes per sampled pixel.
        3.0 / (self.downscale as f64 * self.downscale as f64)
    }

    fn on_start(&mut self, ctx: &ReporterContext) -> ReporterResult<()> {
        std::fs::create_dir_all(&ctx.output_dir)?;
        self.preview_width = ctx.extent.width.div_ceil(self.downscale);
        self.preview_height = ctx.extent.height.div_ceil(self.downscale);
        self.rgb = vec![0u8; (self.preview_width * self.preview_height * 3) as usize];
        self.out_path = Some(ctx.output_dir.join("preview.png"));
        Ok(())
    }

    fn on_chunk(&mut self, chunk: &ChunkResult) -> ReporterResult<()> {
        let window = chunk.valid_window;
        let classes = chunk.num_classes();
        let d = self.downscale;

        // Sample the window at global rows/cols that are multiples of the
        // downscale factor.
        let first_row = window.row_start.div_ceil(d) * d;
        let first_col = window.col_start.div_ceil(d) * d;
        let mut row = first_row;
        while row < window.row_end() {
            let mut col = first_col;
            while col < window.col_end() {
                let lr = (row - window.row_start) as usize;
                let lc = (col - window.col_start) as usize;
                let mut best = 0usize;
                let mut best_p = f32::NEG_INFINITY;
                for k in 0..classes {
                    let p = chunk.probs[[k, lr, lc]];
                    if p > best_p {
                        best_p = p;
                        best = k;
                    }
                }
                let color = PALETTE[best % PALETTE.len()];
                let pr = row / d;
                let pc = col / d;
                let base = ((pr * self.preview_width + pc) * 3) as usize;
                self.rgb[base..base + 3].copy_from_slice(&color);
                col += d;
            }
            row += d;
        }
        Ok(())
    }

    fn on_finish(&mut self, _ctx: &ReporterContext) -> ReporterResult<()> {
        let Some(path) = &self.out_path else {
            return Ok(());
        };
        let img = image::RgbImage::from_raw(
            self.preview_width,
            self.preview_height,
            std::mem::take(&mut self.rgb),
        )
        .ok_or_else(|| ReporterError::Encoding("preview buffer size mismatch".to_string()))?;
        img.save(path)
            .map_err(|e| ReporterError::Encoding(e.to_string()))?;
        info!("preview: wrote {}", path.display());
        Ok(())
    }
}
