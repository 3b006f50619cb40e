//! The managed heap.
//!
//! A `Heap` owns the registry of every live allocation and decides when to
//! collect. It is the liveness oracle behind `Weak<T>`: an allocation stays
//! resolvable until a collection of its heap finds it unreachable.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::gc::{default_collect_condition, CollectCondition, CollectInfo};
use crate::metrics::{CollectionReason, GcMetrics};
use crate::ptr::{GcBox, GcHeader};
use crate::trace::Trace;
use crate::Gc;

/// A garbage-collected heap.
///
/// `Heap` is a cheap handle; clones share the same heap. Collection is
/// cooperative: it only runs inside [`Heap::alloc`], [`Heap::safepoint`],
/// [`Heap::collect_full`], or when the last handle is dropped.
///
/// Dropping the last `Heap` handle runs a final collection. Objects that are
/// still referenced from outside the heap at that point are leaked rather
/// than freed, so their handles stay valid.
///
/// # Examples
///
/// ```
/// use evanesce::{Gc, Heap};
///
/// let heap = Heap::new();
/// let value = heap.alloc(vec![1, 2, 3]);
/// let weak = Gc::downgrade(&value);
///
/// heap.collect_full();
/// assert!(weak.is_alive());
///
/// drop(value);
/// heap.collect_full();
/// assert!(!weak.is_alive());
/// ```
#[derive(Clone)]
pub struct Heap {
    inner: Rc<HeapInner>,
}

pub(crate) struct HeapInner {
    objects: RefCell<Vec<NonNull<GcHeader>>>,
    bytes_allocated: Cell<usize>,
    allocated_since_collect: Cell<usize>,
    n_gcs_dropped: Cell<usize>,
    collect_condition: Cell<CollectCondition>,
    pub(crate) collecting: Cell<bool>,
    pub(crate) total_collections: Cell<usize>,
    pub(crate) last_metrics: Cell<GcMetrics>,
}

impl Heap {
    /// Create an empty heap using [`default_collect_condition`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_collect_condition(default_collect_condition)
    }

    /// Create an empty heap that collects whenever `condition` returns true
    /// at an allocation or safepoint.
    #[must_use]
    pub fn with_collect_condition(condition: CollectCondition) -> Self {
        Self {
            inner: Rc::new(HeapInner {
                objects: RefCell::new(Vec::new()),
                bytes_allocated: Cell::new(0),
                allocated_since_collect: Cell::new(0),
                n_gcs_dropped: Cell::new(0),
                collect_condition: Cell::new(condition),
                collecting: Cell::new(false),
                total_collections: Cell::new(0),
                last_metrics: Cell::new(GcMetrics::new()),
            }),
        }
    }

    /// Move `value` into the heap.
    ///
    /// This is an allocation safepoint: the collect condition is checked
    /// first and may run a collection.
    pub fn alloc<T: Trace + 'static>(&self, value: T) -> Gc<T> {
        self.safepoint();
        let ptr = GcBox::allocate(value, Rc::downgrade(&self.inner));
        self.inner.register(ptr.cast());
        Gc::from_box(ptr)
    }

    /// Run a full collection now and block until it completes.
    ///
    /// Every object unreachable from outside the heap is reclaimed, and all
    /// `Weak` handles to it report dead once this returns. Does nothing when
    /// called from a destructor running inside a collection.
    pub fn collect_full(&self) {
        self.inner.collect(CollectionReason::Forced);
    }

    /// Collect if the collect condition says so.
    ///
    /// Long-running code that drops many handles without allocating can call
    /// this to keep memory in check.
    pub fn safepoint(&self) {
        if self.inner.collecting.get() {
            return;
        }
        let condition = self.inner.collect_condition.get();
        if condition(&self.collect_info()) {
            self.inner.collect(CollectionReason::Threshold);
        }
    }

    /// Set the function which determines whether the collector should run.
    pub fn set_collect_condition(&self, condition: CollectCondition) {
        self.inner.collect_condition.set(condition);
    }

    /// Current heap statistics, as passed to the collect condition.
    #[must_use]
    pub fn collect_info(&self) -> CollectInfo {
        CollectInfo {
            n_gcs_dropped: self.inner.n_gcs_dropped.get(),
            n_objects: self.inner.object_count(),
            heap_size: self.inner.bytes_allocated(),
            allocated_since_collect: self.inner.allocated_since_collect.get(),
        }
    }

    /// Number of objects not yet reclaimed.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner.object_count()
    }

    /// Bytes held by objects not yet reclaimed.
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.inner.bytes_allocated()
    }

    /// Statistics from the most recent collection of this heap.
    #[must_use]
    pub fn last_metrics(&self) -> GcMetrics {
        self.inner.last_metrics.get()
    }

    /// Returns true while a collection of this heap is running.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.inner.collecting.get()
    }

    /// Returns `true` if both handles refer to the same heap.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.inner, &other.inner)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("objects", &self.object_count())
            .field("bytes_allocated", &self.bytes_allocated())
            .field("total_collections", &self.inner.total_collections.get())
            .finish_non_exhaustive()
    }
}

impl HeapInner {
    fn register(&self, header: NonNull<GcHeader>) {
        // SAFETY: freshly allocated.
        let size = unsafe { header.as_ref() }.size();
        self.objects.borrow_mut().push(header);
        self.bytes_allocated.set(self.bytes_allocated.get() + size);
        self.allocated_since_collect
            .set(self.allocated_since_collect.get() + size);
    }

    /// Called by `Gc::drop` when an object loses its last handle.
    pub(crate) fn note_unreferenced(&self) {
        self.n_gcs_dropped.set(self.n_gcs_dropped.get() + 1);
    }

    pub(crate) fn object_count(&self) -> usize {
        self.objects.borrow().len()
    }

    pub(crate) fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.get()
    }

    /// Hand the registry to a collection, leaving it empty.
    pub(crate) fn take_objects(&self) -> Vec<NonNull<GcHeader>> {
        self.bytes_allocated.set(0);
        self.allocated_since_collect.set(0);
        self.n_gcs_dropped.set(0);
        std::mem::take(&mut *self.objects.borrow_mut())
    }

    /// Re-register the survivors of a collection.
    pub(crate) fn restore_objects(&self, survivors: Vec<NonNull<GcHeader>>, bytes: usize) {
        let mut objects = self.objects.borrow_mut();
        if objects.is_empty() {
            *objects = survivors;
        } else {
            objects.extend(survivors);
        }
        self.bytes_allocated.set(self.bytes_allocated.get() + bytes);
    }
}

impl Drop for HeapInner {
    fn drop(&mut self) {
        self.collect(CollectionReason::HeapDrop);
    }
}
