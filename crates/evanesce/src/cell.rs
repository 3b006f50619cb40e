//! Interior mutability for GC-managed objects.
//!
//! `GcCell<T>` acts like `RefCell<T>` and is the way to mutate `Gc` fields
//! (or a `WeakMap`) living inside a heap object.

use std::cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut};
use std::fmt;

use crate::trace::{Trace, Visitor};

/// A mutable memory location inside a garbage-collected object.
///
/// Handles stored in a `GcCell` that is mutably borrowed while a collection
/// runs are not counted as heap-internal, so their targets are treated as
/// roots for that collection. Holding a `borrow_mut` across an allocation is
/// therefore safe, it just delays reclamation.
///
/// # Example
///
/// ```
/// use evanesce::{Gc, GcCell, Heap, Trace};
///
/// #[derive(Trace)]
/// struct Node {
///     next: GcCell<Option<Gc<Node>>>,
/// }
///
/// let heap = Heap::new();
/// let a = heap.alloc(Node { next: GcCell::new(None) });
/// let b = heap.alloc(Node { next: GcCell::new(None) });
/// *a.next.borrow_mut() = Some(Gc::clone(&b));
/// *b.next.borrow_mut() = Some(Gc::clone(&a));
///
/// let weak = Gc::downgrade(&a);
/// drop(a);
/// drop(b);
/// heap.collect_full();
/// assert!(!weak.is_alive());
/// ```
pub struct GcCell<T: ?Sized> {
    inner: RefCell<T>,
}

impl<T> GcCell<T> {
    /// Creates a new `GcCell` containing `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    /// Consumes the `GcCell`, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Replaces the wrapped value, returning the old one.
    ///
    /// # Panics
    ///
    /// Panics if the value is currently borrowed.
    pub fn replace(&self, value: T) -> T {
        self.inner.replace(value)
    }
}

impl<T: ?Sized> GcCell<T> {
    /// Immutably borrows the wrapped value.
    ///
    /// # Panics
    ///
    /// Panics if the value is currently mutably borrowed.
    #[inline]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Mutably borrows the wrapped value.
    ///
    /// # Panics
    ///
    /// Panics if the value is currently borrowed.
    #[inline]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// Immutably borrows the wrapped value, returning an error if it is
    /// currently mutably borrowed.
    #[inline]
    pub fn try_borrow(&self) -> Result<Ref<'_, T>, BorrowError> {
        self.inner.try_borrow()
    }

    /// Mutably borrows the wrapped value, returning an error if it is
    /// currently borrowed.
    #[inline]
    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, T>, BorrowMutError> {
        self.inner.try_borrow_mut()
    }
}

impl<T: Default> Default for GcCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for GcCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(value) => f.debug_struct("GcCell").field("value", &&*value).finish(),
            Err(_) => f.write_str("GcCell { <borrowed> }"),
        }
    }
}

// SAFETY: traces its contents when it can borrow them; see the type docs for
// what happens when it cannot.
unsafe impl<T: Trace + ?Sized> Trace for GcCell<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        if let Ok(inner) = self.inner.try_borrow() {
            inner.trace(visitor);
        }
    }
}
