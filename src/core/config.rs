//! Run configuration and the layered override merge.
//!
//! A run is configured by folding an ordered list of partial configuration
//! patches into one immutable [`RunConfig`] before the pipeline starts.
//! Precedence is `Global < GroupShared < PerTarget < PerInstance`; within a
//! layer, later patches win. The resolved config is never mutated during a
//! run.

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default memory ceiling when none is configured (2 GiB).
pub const DEFAULT_MEMORY_CEILING: u64 = 2 * 1024 * 1024 * 1024;

/// Default multiplier applied to the per-pixel cost when sizing chunks.
pub const DEFAULT_SAFETY_FACTOR: f64 = 1.25;

/// How the stitcher merges overlapping patch predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Weight each patch's vote by inverse distance to the patch center.
    /// Patches vote less near their own edges, where convolutional models
    /// are least reliable.
    #[default]
    CenterWeighted,
    /// Later patches in raster order overwrite earlier ones. Cheap fallback.
    LastWriterWins,
}

/// What the patch slicer does with trailing partial patches when the chunk
/// size is not an exact multiple of the stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Emit a final patch padded to the declared size, with the padded
    /// extent flagged in the descriptor so it never reaches the stitched
    /// output.
    #[default]
    PadWithMask,
    /// Drop trailing partial patches. Pixels not covered by any patch stay
    /// zero in the merged output.
    DropPartial,
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Hard memory ceiling in bytes for chunk sizing.
    pub memory_ceiling_bytes: u64,
    /// Multiplier applied to per-pixel cost when solving for chunk size.
    pub safety_factor: f64,
    /// Patch side length in pixels fed to the inference capability.
    pub patch_size: u32,
    /// Step between patch origins. Strides smaller than the patch size
    /// produce overlapping patches for the stitcher to blend.
    pub stride: u32,
    /// Number of patches per inference batch.
    pub batch_size: usize,
    /// Explicit chunk side override; `None` lets the budget planner decide.
    pub chunk_size: Option<u32>,
    /// Explicit overlap margin override; `None` uses the capability's
    /// declared receptive field.
    pub overlap_margin: Option<u32>,
    /// Capacity of the bounded queues between pipeline stages.
    pub queue_capacity: usize,
    /// Merge rule for overlapping patch predictions.
    pub overlap_policy: OverlapPolicy,
    /// Trailing-patch policy for the slicer.
    pub edge_policy: EdgePolicy,
    /// Names of enabled reporters, in dispatch order.
    pub reporters: Vec<String>,
    /// Directory reporters write into.
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING,
            safety_factor: DEFAULT_SAFETY_FACTOR,
            patch_size: 224,
            stride: 112,
            batch_size: 8,
            chunk_size: None,
            overlap_margin: None,
            queue_capacity: 2,
            overlap_policy: OverlapPolicy::default(),
            edge_policy: EdgePolicy::default(),
            reporters: vec![
                "class_map".to_string(),
                "aggregate".to_string(),
                "preview".to_string(),
            ],
            output_dir: PathBuf::from("rasterflow_out"),
        }
    }
}

impl RunConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory ceiling in bytes.
    pub fn with_memory_ceiling(mut self, bytes: u64) -> Self {
        self.memory_ceiling_bytes = bytes;
        self
    }

    /// Set the memory ceiling in megabytes.
    pub fn with_memory_ceiling_mb(mut self, mb: u64) -> Self {
        self.memory_ceiling_bytes = mb * 1024 * 1024;
        self
    }

    /// Set patch size and stride together.
    pub fn with_patch_geometry(mut self, patch_size: u32, stride: u32) -> Self {
        self.patch_size = patch_size;
        self.stride = stride;
        self
    }

    /// Set the inference batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the chunk side length.
    pub fn with_chunk_size(mut self, side: u32) -> Self {
        self.chunk_size = Some(side);
        self
    }

    /// Override the overlap margin.
    pub fn with_overlap_margin(mut self, margin: u32) -> Self {
        self.overlap_margin = Some(margin);
        self
    }

    /// Set the inter-stage queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the overlap merge policy.
    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    /// Set the trailing-patch edge policy.
    pub fn with_edge_policy(mut self, policy: EdgePolicy) -> Self {
        self.edge_policy = policy;
        self
    }

    /// Set the enabled reporter names.
    pub fn with_reporters<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        names: I,
    ) -> Self {
        self.reporters = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the reporter output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the chunk-sizing safety factor.
    pub fn with_safety_factor(mut self, factor: f64) -> Self {
        self.safety_factor = factor;
        self
    }

    /// Check internal consistency. Called by the orchestrator before any
    /// chunk is planned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.patch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "patch_size".to_string(),
                reason: "must be nonzero".to_string(),
            });
        }
        if self.stride == 0 || self.stride > self.patch_size {
            return Err(ConfigError::InvalidValue {
                key: "stride".to_string(),
                reason: format!(
                    "must be in 1..={} (the patch size), got {}",
                    self.patch_size, self.stride
                ),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size".to_string(),
                reason: "must be nonzero".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity".to_string(),
                reason: "must be nonzero".to_string(),
            });
        }
        if self.safety_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "safety_factor".to_string(),
                reason: format!("must be >= 1.0, got {}", self.safety_factor),
            });
        }
        if let Some(side) = self.chunk_size {
            if side < self.patch_size {
                return Err(ConfigError::InvalidValue {
                    key: "chunk_size".to_string(),
                    reason: format!(
                        "must be at least the patch size {}, got {}",
                        self.patch_size, side
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Precedence layer of a configuration patch. Lower layers are applied
/// first and overridden by higher ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLayer {
    /// Site-wide defaults.
    Global,
    /// Shared by a group of related runs.
    GroupShared,
    /// Specific to one raster / target.
    PerTarget,
    /// Specific to this invocation.
    PerInstance,
}

/// A partial configuration: every field optional, unset fields inherit from
/// lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    /// Override for [`RunConfig::memory_ceiling_bytes`].
    pub memory_ceiling_bytes: Option<u64>,
    /// Override for [`RunConfig::safety_factor`].
    pub safety_factor: Option<f64>,
    /// Override for [`RunConfig::patch_size`].
    pub patch_size: Option<u32>,
    /// Override for [`RunConfig::stride`].
    pub stride: Option<u32>,
    /// Override for [`RunConfig::batch_size`].
    pub batch_size: Option<usize>,
    /// Override for [`RunConfig::chunk_size`].
    pub chunk_size: Option<u32>,
    /// Override for [`RunConfig::overlap_margin`].
    pub overlap_margin: Option<u32>,
    /// Override for [`RunConfig::queue_capacity`].
    pub queue_capacity: Option<usize>,
    /// Override for [`RunConfig::overlap_policy`].
    pub overlap_policy: Option<OverlapPolicy>,
    /// Override for [`RunConfig::edge_policy`].
    pub edge_policy: Option<EdgePolicy>,
    /// Override for [`RunConfig::reporters`].
    pub reporters: Option<Vec<String>>,
    /// Override for [`RunConfig::output_dir`].
    pub output_dir: Option<PathBuf>,
}

impl ConfigPatch {
    /// Parse a patch from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply this patch on top of a configuration.
    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(v) = self.memory_ceiling_bytes {
            config.memory_ceiling_bytes = v;
        }
        if let Some(v) = self.safety_factor {
            config.safety_factor = v;
        }
        if let Some(v) = self.patch_size {
            config.patch_size = v;
        }
        if let Some(v) = self.stride {
            config.stride = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.chunk_size {
            config.chunk_size = Some(v);
        }
        if let Some(v) = self.overlap_margin {
            config.overlap_margin = Some(v);
        }
        if let Some(v) = self.queue_capacity {
            config.queue_capacity = v;
        }
        if let Some(v) = self.overlap_policy {
            config.overlap_policy = v;
        }
        if let Some(v) = self.edge_policy {
            config.edge_policy = v;
        }
        if let Some(ref v) = self.reporters {
            config.reporters = v.clone();
        }
        if let Some(ref v) = self.output_dir {
            config.output_dir = v.clone();
        }
    }
}

/// An ordered stack of configuration patches, resolved once into the
/// immutable run configuration.
#[derive(Debug, Default)]
pub struct ConfigStack {
    patches: Vec<(ConfigLayer, ConfigPatch)>,
}

impl ConfigStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a patch at the given layer.
    pub fn push(&mut self, layer: ConfigLayer, patch: ConfigPatch) -> &mut Self {
        self.patches.push((layer, patch));
        self
    }

    /// Fold all patches over the defaults, lowest layer first, and validate
    /// the result.
    pub fn resolve(&self) -> Result<RunConfig, ConfigError> {
        let mut config = RunConfig::default();
        // Stable sort keeps insertion order within a layer.
        let mut ordered: Vec<&(ConfigLayer, ConfigPatch)> = self.patches.iter().collect();
        ordered.sort_by_key(|(layer, _)| *layer);
        for (_, patch) in ordered {
            patch.apply_to(&mut config);
        }
        config.validate()?;
        Ok(config)
    }
}
