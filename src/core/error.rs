//! Error types for rasterflow.
//!
//! Uses thiserror for structured errors with context. The taxonomy follows
//! the failure boundaries of the pipeline: planning errors surface before
//! any chunk is processed, inference and source errors cancel the run,
//! reporter errors degrade it, and geometry errors are programming errors
//! that are never silently corrected.

use crate::core::types::ChunkId;
use thiserror::Error;

/// Top-level error type for rasterflow.
///
/// This enum encompasses all error categories and enables automatic
/// conversion from the domain-specific error types.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Reporter error: {0}")]
    Reporter(#[from] ReporterError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether this error merely degrades the run instead of cancelling it.
    ///
    /// Only reporter failures are survivable: the chunk stream continues and
    /// the run completes with a degraded flag.
    pub fn is_degradation(&self) -> bool {
        matches!(self, EngineError::Reporter(_))
    }
}

/// Errors from the memory budget planner.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error(
        "resource exhausted: no chunk of at least {min_side}x{min_side} px fits \
         {ceiling_bytes} bytes at {bytes_per_pixel:.1} B/px"
    )]
    ResourceExhausted {
        ceiling_bytes: u64,
        bytes_per_pixel: f64,
        min_side: u32,
    },

    #[error("invalid budget input: {reason}")]
    InvalidBudget { reason: String },
}

/// Errors from configuration resolution and validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("unknown reporter '{name}'")]
    UnknownReporter { name: String },
}

/// Errors from a raster source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("window ({row_start},{col_start}) {height}x{width} exceeds raster bounds")]
    WindowOutOfBounds {
        row_start: u32,
        col_start: u32,
        height: u32,
        width: u32,
    },

    #[error("source has {got} bands, expected {expected}")]
    BandMismatch { expected: u32, got: u32 },

    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Errors from the external inference capability or its driver.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("capability failed on a batch of {batch_size} patches: {message}")]
    CapabilityFailure { batch_size: usize, message: String },

    #[error("capability returned shape {got}, expected {expected}")]
    ShapeMismatch { expected: String, got: String },

    #[error("attempted to run an empty patch batch")]
    EmptyBatch,
}

/// Errors from an output reporter.
///
/// Reporter errors never cancel other reporters for the same chunk; they
/// mark the run as degraded.
#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("reporter '{reporter}' failed to start: {message}")]
    StartFailed { reporter: String, message: String },

    #[error("reporter '{reporter}' rejected {chunk}: {message}")]
    ChunkRejected {
        reporter: String,
        chunk: ChunkId,
        message: String,
    },

    #[error("reporter '{reporter}' failed to finish: {message}")]
    FinishFailed { reporter: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Violations of the chunk/patch geometry invariants.
///
/// These indicate a programming error; the pipeline never corrects them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("valid chunk windows leave pixel ({row},{col}) uncovered")]
    CoverageGap { row: u32, col: u32 },

    #[error("valid windows of {a} and {b} overlap")]
    WindowOverlap { a: ChunkId, b: ChunkId },

    #[error("patch at ({row_offset},{col_offset}) size {size} exceeds {chunk} bounds")]
    PatchOutOfBounds {
        chunk: ChunkId,
        row_offset: u32,
        col_offset: u32,
        size: u32,
    },

    #[error("chunks delivered out of order: expected {expected}, got {got}")]
    WindowOrder { expected: ChunkId, got: ChunkId },

    #[error("result shape {got} does not match window {expected}")]
    ShapeMismatch { expected: String, got: String },
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Result type alias for reporter operations.
pub type ReporterResult<T> = Result<T, ReporterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_errors_are_degradations() {
        let err = EngineError::Reporter(ReporterError::ChunkRejected {
            reporter: "class_map".to_string(),
            chunk: ChunkId(3),
            message: "disk full".to_string(),
        });
        assert!(err.is_degradation());

        let fatal = EngineError::Plan(PlanError::ResourceExhausted {
            ceiling_bytes: 1024,
            bytes_per_pixel: 12.0,
            min_side: 128,
        });
        assert!(!fatal.is_degradation());
    }

    #[test]
    fn error_messages_name_the_chunk() {
        let err = GeometryError::WindowOrder {
            expected: ChunkId(2),
            got: ChunkId(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("chunk#2"));
        assert!(msg.contains("chunk#5"));
    }
}
