//! Trace trait and Visitor pattern for garbage collection.
//!
//! Types that implement `Trace` can be stored in `Gc<T>` and will be
//! traversed during garbage collection.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, LinkedList, VecDeque};
use std::hash::BuildHasher;
use std::ptr::NonNull;

use crate::ptr::{GcHeader, Weak};
use crate::Gc;

// ============================================================================
// Core Traits
// ============================================================================

/// A type that can be traced by the garbage collector.
///
/// # Safety
///
/// Implementations **MUST** report every `Gc<T>` handle they own by calling
/// `visitor.visit()` on it **exactly once**. The collector finds its roots by
/// comparing each object's handle count with the number of handles reported
/// from inside the heap, so:
///
/// - a handle that is never reported only keeps its target alive (a leak);
/// - a handle reported twice makes an externally held object look
///   unreferenced, which leads to use-after-free.
///
/// This is why there are no `Trace` impls for `Rc<T>` or `Arc<T>`: the same
/// shared allocation would be reported once per clone.
///
/// `Drop` impls of traced types must not dereference their `Gc` fields; the
/// targets may already have been reclaimed in the same sweep.
///
/// Prefer using `#[derive(Trace)]` instead of manual implementation.
///
/// # Examples
///
/// For types that don't contain `Gc` handles:
///
/// ```ignore
/// unsafe impl Trace for MyPrimitive {
///     fn trace(&self, _visitor: &mut impl Visitor) {}
/// }
/// ```
///
/// For types containing `Gc` fields:
///
/// ```ignore
/// unsafe impl Trace for MyStruct {
///     fn trace(&self, visitor: &mut impl Visitor) {
///         self.gc_field.trace(visitor);
///         self.another_gc.trace(visitor);
///     }
/// }
/// ```
pub unsafe trait Trace {
    /// Visit all `Gc` handles contained within this value.
    fn trace(&self, visitor: &mut impl Visitor);
}

/// A visitor that traverses the object graph during garbage collection.
///
/// Users generally do not need to implement this trait. It is used
/// internally by the collector.
pub trait Visitor {
    /// Visit a garbage-collected handle.
    fn visit<T: Trace>(&mut self, gc: &Gc<T>);
}

// ============================================================================
// Concrete Visitor for GC
// ============================================================================

/// The two passes a collection makes over the object graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VisitorKind {
    /// Count handles held inside heap objects, per target.
    CountInternal,
    /// Mark everything reachable from the roots.
    Mark,
}

/// The visitor the collector hands to every object's trace function.
pub(crate) struct GcVisitor {
    pub(crate) kind: VisitorKind,
    /// Objects marked but not yet traced.
    pub(crate) worklist: Vec<NonNull<GcHeader>>,
    /// Handles seen while counting.
    pub(crate) edges_counted: usize,
    /// Objects marked by this visitor.
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) objects_marked: usize,
}

impl GcVisitor {
    pub(crate) const fn new(kind: VisitorKind) -> Self {
        Self {
            kind,
            worklist: Vec::new(),
            edges_counted: 0,
            objects_marked: 0,
        }
    }

    /// Mark `header` and queue it for tracing if it wasn't marked already.
    pub(crate) fn mark(&mut self, header: NonNull<GcHeader>) {
        // SAFETY: every header handed to the visitor belongs to a registered,
        // not yet swept allocation.
        let h = unsafe { header.as_ref() };
        if !h.is_marked() {
            h.set_marked(true);
            self.objects_marked += 1;
            self.worklist.push(header);
        }
    }
}

impl Visitor for GcVisitor {
    fn visit<T: Trace>(&mut self, gc: &Gc<T>) {
        let header = Gc::header_ptr(gc);
        match self.kind {
            VisitorKind::CountInternal => {
                // SAFETY: a live handle keeps its allocation registered.
                unsafe { header.as_ref() }.inc_internal();
                self.edges_counted += 1;
            }
            VisitorKind::Mark => self.mark(header),
        }
    }
}

// ============================================================================
// Trace implementations for Gc<T> and Weak<T>
// ============================================================================

// SAFETY: a Gc reports itself
unsafe impl<T: Trace> Trace for Gc<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        visitor.visit(self);
    }
}

// SAFETY: weak edges are not part of reachability
unsafe impl<T: Trace> Trace for Weak<T> {
    #[inline]
    fn trace(&self, _visitor: &mut impl Visitor) {}
}

// ============================================================================
// Trace implementations for primitive types
// ============================================================================

macro_rules! impl_trace_for_primitives {
    ($($t:ty),* $(,)?) => {
        $(
            // SAFETY: contains no Gc handles
            unsafe impl Trace for $t {
                #[inline]
                fn trace(&self, _visitor: &mut impl Visitor) {}
            }
        )*
    };
}

impl_trace_for_primitives! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    bool, char, (),
    String, str,
    &'static str,
    std::time::Duration,
    std::time::Instant,
    std::time::SystemTime,
    std::path::Path,
    std::path::PathBuf,
    std::ffi::OsStr,
    std::ffi::OsString,
    std::num::NonZeroU32,
    std::num::NonZeroU64,
    std::num::NonZeroUsize,
}

// ============================================================================
// Trace implementations for std container types
// ============================================================================

// SAFETY: Box traces its contents
unsafe impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        T::trace(self.as_ref(), visitor);
    }
}

// SAFETY: Vec traces all elements
unsafe impl<T: Trace> Trace for Vec<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Arrays trace all elements
unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Slices trace all elements
unsafe impl<T: Trace> Trace for [T] {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Option traces its contents if Some
unsafe impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        if let Some(inner) = self {
            inner.trace(visitor);
        }
    }
}

// SAFETY: Result traces whichever variant is present
unsafe impl<T: Trace, E: Trace> Trace for Result<T, E> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        match self {
            Ok(v) => v.trace(visitor),
            Err(e) => e.trace(visitor),
        }
    }
}

// SAFETY: a Copy type can never own a Gc handle
unsafe impl<T: Copy> Trace for Cell<T> {
    #[inline]
    fn trace(&self, _visitor: &mut impl Visitor) {}
}

// SAFETY: RefCell traces its contents when it can borrow them
unsafe impl<T: Trace + ?Sized> Trace for RefCell<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        // A mutably borrowed cell is skipped: its handles go uncounted, which
        // roots their targets for this collection.
        if let Ok(inner) = self.try_borrow() {
            inner.trace(visitor);
        }
    }
}

// SAFETY: VecDeque traces all elements
unsafe impl<T: Trace> Trace for VecDeque<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: LinkedList traces all elements
unsafe impl<T: Trace> Trace for LinkedList<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: BinaryHeap traces all elements
unsafe impl<T: Trace> Trace for BinaryHeap<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: HashMap traces all keys and values
unsafe impl<K: Trace, V: Trace, S: BuildHasher> Trace for HashMap<K, V, S> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for (k, v) in self {
            k.trace(visitor);
            v.trace(visitor);
        }
    }
}

// SAFETY: HashSet traces all elements
unsafe impl<T: Trace, S: BuildHasher> Trace for HashSet<T, S> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: BTreeMap traces all key-value pairs
unsafe impl<K: Trace, V: Trace> Trace for BTreeMap<K, V> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for (k, v) in self {
            k.trace(visitor);
            v.trace(visitor);
        }
    }
}

// SAFETY: BTreeSet traces all elements
unsafe impl<T: Trace> Trace for BTreeSet<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// ============================================================================
// Trace implementations for tuples
// ============================================================================

macro_rules! impl_trace_for_tuples {
    () => {};
    ($first:ident $(, $rest:ident)*) => {
        // SAFETY: Tuples trace all their elements
        unsafe impl<$first: Trace $(, $rest: Trace)*> Trace for ($first, $($rest,)*) {
            #[inline]
            #[allow(non_snake_case)]
            fn trace(&self, visitor: &mut impl Visitor) {
                let ($first, $($rest,)*) = self;
                $first.trace(visitor);
                $($rest.trace(visitor);)*
            }
        }
        impl_trace_for_tuples!($($rest),*);
    };
}

impl_trace_for_tuples!(A, B, C, D, E, F, G, H);

// SAFETY: PhantomData contains no actual data
unsafe impl<T: ?Sized> Trace for std::marker::PhantomData<T> {
    #[inline]
    fn trace(&self, _visitor: &mut impl Visitor) {}
}
