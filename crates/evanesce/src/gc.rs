//! Mark-sweep garbage collection.
//!
//! Roots are found without scanning the stack. Every `Gc` handle counts
//! toward its allocation's `ref_count`; a collection traces every registered
//! object once to count the handles held *inside* the heap, and any object
//! with more handles than that is referenced from outside and becomes a
//! root. Marking then proceeds from the roots, and everything unmarked is
//! swept.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::heap::HeapInner;
use crate::metrics::{CollectionReason, GcMetrics, PhaseTimer};
use crate::ptr::GcHeader;
use crate::trace::{GcVisitor, VisitorKind};

#[cfg(feature = "tracing")]
use crate::tracing::internal::{
    log_phase_end_mark, log_phase_end_sweep, log_phase_start, next_gc_id, trace_gc_collection,
    trace_phase, GcPhase,
};

// ============================================================================
// Collection statistics
// ============================================================================

/// Statistics about the current heap state, used to decide when to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectInfo {
    pub(crate) n_gcs_dropped: usize,
    pub(crate) n_objects: usize,
    pub(crate) heap_size: usize,
    pub(crate) allocated_since_collect: usize,
}

impl CollectInfo {
    /// Number of times an object lost its last `Gc` handle since the last
    /// collection.
    #[must_use]
    pub const fn n_gcs_dropped_since_last_collect(&self) -> usize {
        self.n_gcs_dropped
    }

    /// Number of objects currently registered with the heap.
    #[must_use]
    pub const fn n_objects(&self) -> usize {
        self.n_objects
    }

    /// Total bytes held by registered objects.
    #[must_use]
    pub const fn heap_size(&self) -> usize {
        self.heap_size
    }

    /// Bytes allocated since the last collection.
    #[must_use]
    pub const fn allocated_since_last_collect(&self) -> usize {
        self.allocated_since_collect
    }
}

// ============================================================================
// Collection condition
// ============================================================================

/// Type for collection condition functions.
pub type CollectCondition = fn(&CollectInfo) -> bool;

/// Bytes allocated since the last collection that trigger the next one.
const ALLOCATION_THRESHOLD: usize = 1024 * 1024;

/// The default collection condition.
///
/// Collects when more handles were dropped than there are objects, or when
/// more than 1 MiB was allocated since the last collection. This keeps the
/// amortized collection overhead constant per allocation.
#[must_use]
pub const fn default_collect_condition(info: &CollectInfo) -> bool {
    info.n_gcs_dropped > info.n_objects || info.allocated_since_collect > ALLOCATION_THRESHOLD
}

/// A collection condition that never fires; only `Heap::collect_full`
/// reclaims memory.
#[must_use]
pub const fn never_collect(_info: &CollectInfo) -> bool {
    false
}

// ============================================================================
// Collection epoch
// ============================================================================

/// Bumped whenever a sweep reclaims at least one object, on any heap.
static COLLECTION_EPOCH: AtomicU64 = AtomicU64::new(0);

/// The current collection epoch.
///
/// `Weak::is_alive` can only change from `true` to `false` during a sweep
/// that reclaims something, and every such sweep increments this counter
/// before any reclaimed value is dropped. A cache of liveness answers stays
/// valid for as long as the epoch it was computed at is current.
#[must_use]
pub fn collection_epoch() -> u64 {
    COLLECTION_EPOCH.load(Ordering::Acquire)
}

fn advance_epoch() {
    COLLECTION_EPOCH.fetch_add(1, Ordering::AcqRel);
}

// ============================================================================
// Mark-Sweep Collection
// ============================================================================

impl HeapInner {
    /// Run a full collection over this heap.
    ///
    /// Returns `None` when called re-entrantly from a destructor running
    /// inside a sweep.
    #[allow(clippy::too_many_lines)]
    pub(crate) fn collect(&self, reason: CollectionReason) -> Option<GcMetrics> {
        if self.collecting.replace(true) {
            return None;
        }

        #[cfg(feature = "tracing")]
        let gc_id = next_gc_id();
        #[cfg(feature = "tracing")]
        let _gc_span = trace_gc_collection(reason.as_str(), gc_id);

        let start = Instant::now();
        let mut timer = PhaseTimer::new();

        // Objects allocated by destructors during the sweep register into
        // the emptied list and survive this collection.
        let objects = self.take_objects();

        // Phase 1: clear
        timer.start();
        #[cfg(feature = "tracing")]
        let clear_span = trace_phase(GcPhase::Clear);
        #[cfg(feature = "tracing")]
        log_phase_start(GcPhase::Clear, objects.len());
        for header in &objects {
            // SAFETY: registered headers are valid until swept.
            let h = unsafe { header.as_ref() };
            h.set_marked(false);
            h.reset_internal();
        }
        #[cfg(feature = "tracing")]
        drop(clear_span);
        timer.end_clear();

        // Phase 2: count internal handles, find roots, mark
        timer.start();
        #[cfg(feature = "tracing")]
        let mark_span = trace_phase(GcPhase::Mark);
        #[cfg(feature = "tracing")]
        log_phase_start(GcPhase::Mark, objects.len());
        let mut counter = GcVisitor::new(VisitorKind::CountInternal);
        for header in &objects {
            // SAFETY: every registered value is alive before the sweep.
            unsafe { GcHeader::trace_value(*header, &mut counter) };
        }

        let mut marker = GcVisitor::new(VisitorKind::Mark);
        let mut roots = 0;
        for header in &objects {
            // SAFETY: as above.
            if unsafe { header.as_ref() }.is_externally_referenced() {
                roots += 1;
                marker.mark(*header);
            }
        }
        while let Some(header) = marker.worklist.pop() {
            // SAFETY: only registered, live objects are ever marked.
            unsafe { GcHeader::trace_value(header, &mut marker) };
        }
        #[cfg(feature = "tracing")]
        log_phase_end_mark(roots, marker.objects_marked);
        #[cfg(feature = "tracing")]
        drop(mark_span);
        timer.end_mark();

        // Phase 3: sweep
        timer.start();
        #[cfg(feature = "tracing")]
        let sweep_span = trace_phase(GcPhase::Sweep);
        #[cfg(feature = "tracing")]
        log_phase_start(GcPhase::Sweep, objects.len());
        let (survivors, dead): (Vec<_>, Vec<_>) = objects
            .into_iter()
            // SAFETY: as above.
            .partition(|header| unsafe { header.as_ref() }.is_marked());

        let bytes_surviving = survivors
            .iter()
            // SAFETY: as above.
            .map(|header| unsafe { header.as_ref() }.size())
            .sum::<usize>();
        let sweep = sweep_dead(&dead);
        self.restore_objects(survivors, bytes_surviving);
        #[cfg(feature = "tracing")]
        log_phase_end_sweep(dead.len(), sweep.bytes_reclaimed);
        #[cfg(feature = "tracing")]
        drop(sweep_span);
        timer.end_sweep();

        let total_collections = self.total_collections.get() + 1;
        self.total_collections.set(total_collections);

        let metrics = GcMetrics {
            duration: start.elapsed(),
            clear_duration: timer.clear,
            mark_duration: timer.mark,
            sweep_duration: timer.sweep,
            roots,
            internal_edges: counter.edges_counted,
            objects_reclaimed: dead.len(),
            objects_surviving: self.object_count(),
            bytes_reclaimed: sweep.bytes_reclaimed,
            bytes_surviving: self.bytes_allocated(),
            objects_orphaned: sweep.orphaned,
            reason,
            total_collections,
        };
        self.last_metrics.set(metrics);
        self.collecting.set(false);
        Some(metrics)
    }
}

struct SweepResult {
    bytes_reclaimed: usize,
    orphaned: usize,
}

/// Reclaim `dead`, which must be unmarked and no longer registered.
///
/// Values are dropped only after every dead object is flagged, so a
/// destructor that still holds a `Weak` to another dead object sees it as
/// collected. Allocations are released only after every value is dropped,
/// so `Gc` handles dropped by those destructors never touch freed memory.
fn sweep_dead(dead: &[NonNull<GcHeader>]) -> SweepResult {
    let mut result = SweepResult {
        bytes_reclaimed: 0,
        orphaned: 0,
    };
    if dead.is_empty() {
        return result;
    }

    for header in dead {
        // SAFETY: the allocation stays valid until the release loop below.
        unsafe { header.as_ref() }.set_dead();
    }
    advance_epoch();

    for header in dead {
        // SAFETY: flagged dead above; no Gc handle outside the dead set
        // points here, so nothing can observe the value again.
        unsafe { GcHeader::drop_value(*header) };
    }

    for header in dead {
        // SAFETY: still allocated; values are all dropped.
        let h = unsafe { header.as_ref() };
        result.bytes_reclaimed += h.size();
        if h.weak_count() == 0 {
            // SAFETY: no Gc (value dropped) and no Weak handles remain.
            unsafe { GcHeader::dealloc(*header) };
        } else {
            h.set_orphaned();
            result.orphaned += 1;
        }
    }

    result
}
