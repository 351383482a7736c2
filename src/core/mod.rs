//! Core types for the rasterflow engine.
//!
//! This module contains the foundational pieces shared by every stage of
//! the pipeline:
//! - Geometry and buffer types (windows, chunks, band-major buffers)
//! - Error types
//! - The layered run configuration

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigLayer, ConfigPatch, ConfigStack, EdgePolicy, OverlapPolicy, RunConfig};
pub use error::{
    ConfigError, EngineError, GeometryError, InferenceError, PlanError, ReporterError,
    SourceError,
};
pub use types::{
    ChunkBuffer, ChunkId, ChunkResult, ChunkWindow, GeoProfile, Margin, RasterExtent,
    RasterWindow, RunId,
};
