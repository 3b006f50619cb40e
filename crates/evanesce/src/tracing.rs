//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for collections and weak map pruning.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// High-level GC phases (clear/mark/sweep).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Reset mark bits and internal handle counts.
        Clear,
        /// Find roots and trace the live object graph.
        Mark,
        /// Reclaim unreachable objects.
        Sweep,
    }

    /// Stable identifier for a GC run, used to correlate the events of one
    /// collection. Starts at 1 and increases monotonically.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique GC ID.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for the entire GC collection.
    pub fn trace_gc_collection(reason: &str, gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collect", reason = reason, gc_id = gc_id.0).entered()
    }

    /// Create a span for a GC phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the start of a GC phase.
    pub fn log_phase_start(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_start");
    }

    /// Log the end of the mark phase.
    pub fn log_phase_end_mark(roots: usize, objects_marked: usize) {
        tracing::debug!(phase = ?GcPhase::Mark, roots, objects_marked, "phase_end");
    }

    /// Log the end of the sweep phase.
    pub fn log_phase_end_sweep(objects_reclaimed: usize, bytes_reclaimed: usize) {
        tracing::debug!(
            phase = ?GcPhase::Sweep,
            objects_reclaimed,
            bytes_reclaimed,
            "phase_end"
        );
    }

    /// Log a weak map dropping entries whose key or value was collected.
    pub fn log_weak_map_pruned(removed: usize, remaining: usize) {
        tracing::trace!(removed, remaining, "weak_map_pruned");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);
}

pub use internal::GcId;
