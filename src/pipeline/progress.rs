//! Progress tracking for pipeline runs.

use crate::core::types::ChunkId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The run has started.
    RunStarted {
        total_chunks: usize,
    },
    /// A chunk buffer has been read from the source.
    ChunkRead {
        chunk: ChunkId,
    },
    /// A chunk's patches have all been inferred.
    ChunkInferred {
        chunk: ChunkId,
        patches: usize,
        duration_ms: u64,
    },
    /// A chunk has been stitched and cropped.
    ChunkStitched {
        chunk: ChunkId,
    },
    /// A chunk has been dispatched to every reporter.
    ChunkReported {
        chunk: ChunkId,
        index: usize,
        total: usize,
    },
    /// Overall progress.
    Progress {
        percent: f32,
        elapsed_ms: u64,
        estimated_remaining_ms: Option<u64>,
    },
    /// The run has completed.
    RunCompleted {
        total_duration_ms: u64,
        chunks_processed: usize,
        degraded: bool,
    },
    /// The run was cancelled.
    Cancelled,
    /// An error occurred.
    Error {
        chunk: Option<ChunkId>,
        message: String,
    },
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Tracks run progress and carries the cancellation flag shared by every
/// stage.
pub struct ProgressTracker {
    total_chunks: usize,
    reported_chunks: AtomicU64,
    cancelled: AtomicBool,
    start_time: Option<Instant>,
    callback: Option<ProgressCallback>,
    chunk_times: Mutex<Vec<u64>>,
}

impl ProgressTracker {
    /// Create a tracker for a run of `total_chunks` chunks.
    pub fn new(total_chunks: usize) -> Self {
        Self {
            total_chunks,
            reported_chunks: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            start_time: None,
            callback: None,
            chunk_times: Mutex::new(Vec::new()),
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Start tracking.
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        self.send(ProgressEvent::RunStarted {
            total_chunks: self.total_chunks,
        });
    }

    /// Report a chunk read from the source.
    pub fn chunk_read(&self, chunk: ChunkId) {
        self.send(ProgressEvent::ChunkRead { chunk });
    }

    /// Report a chunk's inference finishing.
    pub fn chunk_inferred(&self, chunk: ChunkId, patches: usize, duration_ms: u64) {
        self.chunk_times.lock().push(duration_ms);
        self.send(ProgressEvent::ChunkInferred {
            chunk,
            patches,
            duration_ms,
        });
    }

    /// Report a chunk stitched.
    pub fn chunk_stitched(&self, chunk: ChunkId) {
        self.send(ProgressEvent::ChunkStitched { chunk });
    }

    /// Report a chunk fully dispatched to reporters.
    pub fn chunk_reported(&self, chunk: ChunkId) {
        let done = self.reported_chunks.fetch_add(1, Ordering::Relaxed) as usize + 1;
        self.send(ProgressEvent::ChunkReported {
            chunk,
            index: done,
            total: self.total_chunks,
        });
        self.send_progress();
    }

    /// Whether the run should stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation. Propagates to every stage within one queue
    /// capacity's worth of in-flight chunks.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::Relaxed) {
            self.send(ProgressEvent::Cancelled);
        }
    }

    /// Report an error.
    pub fn report_error(&self, chunk: Option<ChunkId>, message: String) {
        self.send(ProgressEvent::Error { chunk, message });
    }

    /// Complete tracking.
    pub fn complete(&self, degraded: bool) {
        let duration = self
            .start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.send(ProgressEvent::RunCompleted {
            total_duration_ms: duration,
            chunks_processed: self.reported_chunks.load(Ordering::Relaxed) as usize,
            degraded,
        });
    }

    /// Current progress percentage.
    pub fn progress_percent(&self) -> f32 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        let done = self.reported_chunks.load(Ordering::Relaxed) as f32;
        (done / self.total_chunks as f32) * 100.0
    }

    /// Estimate remaining time from per-chunk inference durations.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let times = self.chunk_times.lock();
        if times.is_empty() {
            return None;
        }
        let avg: u64 = times.iter().sum::<u64>() / times.len() as u64;
        let done = self.reported_chunks.load(Ordering::Relaxed) as usize;
        Some(avg * self.total_chunks.saturating_sub(done) as u64)
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }

    fn send_progress(&self) {
        let elapsed = self
            .start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.send(ProgressEvent::Progress {
            percent: self.progress_percent(),
            elapsed_ms: elapsed,
            estimated_remaining_ms: self.estimated_remaining_ms(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn progress_counts_reported_chunks() {
        let tracker = ProgressTracker::new(4);
        assert_eq!(tracker.progress_percent(), 0.0);
        tracker.chunk_reported(ChunkId(0));
        tracker.chunk_reported(ChunkId(1));
        assert_eq!(tracker.progress_percent(), 50.0);
    }

    #[test]
    fn cancellation_is_sticky() {
        let tracker = ProgressTracker::new(4);
        assert!(!tracker.is_cancelled());
        tracker.cancel();
        tracker.cancel();
        assert!(tracker.is_cancelled());
    }

    #[test]
    fn callback_receives_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut tracker = ProgressTracker::new(2).with_callback(Box::new(move |_| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        }));
        tracker.start();
        tracker.chunk_read(ChunkId(0));
        tracker.chunk_inferred(ChunkId(0), 16, 5);
        tracker.chunk_stitched(ChunkId(0));
        tracker.chunk_reported(ChunkId(0));
        // RunStarted + read + inferred + stitched + reported + progress.
        assert_eq!(count.load(Ordering::Relaxed), 6);
    }
}
