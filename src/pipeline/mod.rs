//! Pipeline orchestration: staged read -> infer -> stitch -> report.

pub mod orchestrator;
pub mod progress;

pub use orchestrator::{PipelineOrchestrator, RunSummary, StageTimings};
pub use progress::{ProgressCallback, ProgressEvent, ProgressTracker};
