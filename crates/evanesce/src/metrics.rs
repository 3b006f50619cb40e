//! GC metrics and statistics.

use std::time::{Duration, Instant};

/// Statistics from the most recent collection of a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcMetrics {
    /// Duration of the whole collection.
    pub duration: Duration,
    /// Duration of the clear phase (mark bits and internal counts reset).
    pub clear_duration: Duration,
    /// Duration of the mark phase, including root discovery.
    pub mark_duration: Duration,
    /// Duration of the sweep phase.
    pub sweep_duration: Duration,
    /// Number of objects treated as roots.
    pub roots: usize,
    /// Number of `Gc` handles found inside heap objects.
    pub internal_edges: usize,
    /// Number of objects reclaimed.
    pub objects_reclaimed: usize,
    /// Number of objects surviving.
    pub objects_surviving: usize,
    /// Number of bytes reclaimed.
    pub bytes_reclaimed: usize,
    /// Number of bytes surviving.
    pub bytes_surviving: usize,
    /// Reclaimed objects kept allocated because `Weak` handles still point
    /// at them.
    pub objects_orphaned: usize,
    /// What triggered the collection.
    pub reason: CollectionReason,
    /// Total collections this heap has run, this one included.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Create a new `GcMetrics` with all fields set to zero/defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            clear_duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            roots: 0,
            internal_edges: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            bytes_reclaimed: 0,
            bytes_surviving: 0,
            objects_orphaned: 0,
            reason: CollectionReason::None,
            total_collections: 0,
        }
    }
}

/// Why a collection ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionReason {
    /// No collection has run yet.
    #[default]
    None = 0,
    /// `Heap::collect_full` was called.
    Forced = 1,
    /// The collect condition fired at an allocation or safepoint.
    Threshold = 2,
    /// The last `Heap` handle was dropped.
    HeapDrop = 3,
}

impl CollectionReason {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Forced => "forced",
            Self::Threshold => "threshold",
            Self::HeapDrop => "heap_drop",
        }
    }
}

/// Times the three collection phases.
///
/// - Clear: reset mark bits and internal handle counts
/// - Mark: count internal handles, find roots, mark reachable objects
/// - Sweep: reclaim unmarked objects
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhaseTimer {
    pub(crate) clear: Duration,
    pub(crate) mark: Duration,
    pub(crate) sweep: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    pub(crate) const fn new() -> Self {
        Self {
            clear: Duration::ZERO,
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    pub(crate) fn end_clear(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.clear = start.elapsed();
        }
    }

    pub(crate) fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark = start.elapsed();
        }
    }

    pub(crate) fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep = start.elapsed();
        }
    }
}
