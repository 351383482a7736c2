//! Built-in reporters.

pub mod aggregate;
pub mod class_map;
pub mod preview;

pub use aggregate::AggregateReporter;
pub use class_map::ClassMapReporter;
pub use preview::PreviewReporter;

use crate::report::registry::ReporterRegistry;

/// Register all built-in reporters.
pub fn register_all(registry: &mut ReporterRegistry) {
    registry.register(
        "class_map",
        "Streams class, confidence and entropy rasters to row-major binary files",
        || Box::new(ClassMapReporter::new()),
    );
    registry.register(
        "aggregate",
        "Whole-raster mean class probabilities, written as JSON",
        || Box::new(AggregateReporter::new()),
    );
    registry.register(
        "preview",
        "Incrementally assembled low-resolution PNG preview of the class map",
        || Box::new(PreviewReporter::new()),
    );
}
