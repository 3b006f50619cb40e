//! The `Gc<T>` and `Weak<T>` handles.
//!
//! Every allocation is a `GcBox<T>`: a type-erased `GcHeader` followed by the
//! value. The header carries the handle counts the collector uses to find
//! roots, the mark and dead flags, and the per-type trace/drop/dealloc
//! functions.

#![allow(clippy::ptr_as_ptr)]

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::{addr_of, addr_of_mut, NonNull};
use std::rc::Weak as RcWeak;

use crate::heap::HeapInner;
use crate::trace::{GcVisitor, Trace};

// ============================================================================
// `GcHeader` / `GcBox` - The heap allocation container
// ============================================================================

/// Type-erased bookkeeping shared by every allocation.
pub(crate) struct GcHeader {
    /// Number of `Gc<T>` handles, wherever they live.
    ref_count: Cell<usize>,
    /// Number of `Weak<T>` handles.
    weak_count: Cell<usize>,
    /// Handles found inside other heap objects during the current collection.
    internal_count: Cell<usize>,
    flags: Cell<u8>,
    /// Size of the whole `GcBox<T>` in bytes.
    size: usize,
    /// The heap that owns this allocation.
    heap: RcWeak<HeapInner>,
    trace_fn: unsafe fn(NonNull<GcHeader>, &mut GcVisitor),
    drop_fn: unsafe fn(NonNull<GcHeader>),
    dealloc_fn: unsafe fn(NonNull<GcHeader>),
}

impl GcHeader {
    /// Reached from a root in the current collection.
    const MARKED: u8 = 1 << 0;
    /// The value has been (or is being) dropped by a sweep.
    const DEAD: u8 = 1 << 1;
    /// Swept but kept allocated for outstanding `Weak`s; the last `Weak`
    /// frees it.
    const ORPHANED: u8 = 1 << 2;

    #[inline]
    fn has(&self, flag: u8) -> bool {
        self.flags.get() & flag != 0
    }

    #[inline]
    fn set(&self, flag: u8, on: bool) {
        let flags = self.flags.get();
        self.flags.set(if on { flags | flag } else { flags & !flag });
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.has(Self::MARKED)
    }

    pub(crate) fn set_marked(&self, marked: bool) {
        self.set(Self::MARKED, marked);
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.has(Self::DEAD)
    }

    pub(crate) fn set_dead(&self) {
        self.set(Self::DEAD, true);
    }

    pub(crate) fn set_orphaned(&self) {
        self.set(Self::ORPHANED, true);
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count.get()
    }

    pub(crate) fn weak_count(&self) -> usize {
        self.weak_count.get()
    }

    fn inc_ref(&self) {
        self.ref_count.set(self.ref_count.get().saturating_add(1));
    }

    /// Returns true if this dropped the last `Gc` handle.
    fn dec_ref(&self) -> bool {
        let count = self.ref_count.get();
        debug_assert!(count > 0, "Gc handle count underflow");
        self.ref_count.set(count - 1);
        count == 1
    }

    fn inc_weak(&self) {
        self.weak_count.set(self.weak_count.get().saturating_add(1));
    }

    /// Returns true if this dropped the last `Weak` handle.
    fn dec_weak(&self) -> bool {
        let count = self.weak_count.get();
        debug_assert!(count > 0, "Weak handle count underflow");
        self.weak_count.set(count - 1);
        count == 1
    }

    pub(crate) fn inc_internal(&self) {
        self.internal_count.set(self.internal_count.get() + 1);
    }

    pub(crate) fn reset_internal(&self) {
        self.internal_count.set(0);
    }

    /// Some handle to this object lives outside the heap.
    pub(crate) fn is_externally_referenced(&self) -> bool {
        self.ref_count.get() > self.internal_count.get()
    }

    pub(crate) const fn size(&self) -> usize {
        self.size
    }

    /// Trace the value behind `header`.
    ///
    /// # Safety
    ///
    /// `header` must belong to a registered allocation whose value is alive.
    pub(crate) unsafe fn trace_value(header: NonNull<Self>, visitor: &mut GcVisitor) {
        unsafe { (header.as_ref().trace_fn)(header, visitor) }
    }

    /// Drop the value behind `header`, keeping the allocation.
    ///
    /// # Safety
    ///
    /// Must be called at most once per allocation, by the sweep.
    pub(crate) unsafe fn drop_value(header: NonNull<Self>) {
        unsafe { (header.as_ref().drop_fn)(header) }
    }

    /// Free the allocation.
    ///
    /// # Safety
    ///
    /// The value must already be dropped and no handle may point here.
    pub(crate) unsafe fn dealloc(header: NonNull<Self>) {
        unsafe { (header.as_ref().dealloc_fn)(header) }
    }
}

/// The heap allocation wrapping the user's value.
#[repr(C)]
pub(crate) struct GcBox<T> {
    header: GcHeader,
    value: ManuallyDrop<T>,
}

impl<T: Trace + 'static> GcBox<T> {
    /// Allocate a new box holding `value` with one `Gc` handle.
    pub(crate) fn allocate(value: T, heap: RcWeak<HeapInner>) -> NonNull<Self> {
        let boxed = Box::new(Self {
            header: GcHeader {
                ref_count: Cell::new(1),
                weak_count: Cell::new(0),
                internal_count: Cell::new(0),
                flags: Cell::new(0),
                size: std::mem::size_of::<Self>(),
                heap,
                trace_fn: Self::trace_fn_for,
                drop_fn: Self::drop_fn_for,
                dealloc_fn: Self::dealloc_fn_for,
            },
            value: ManuallyDrop::new(value),
        });
        NonNull::from(Box::leak(boxed))
    }

    unsafe fn trace_fn_for(header: NonNull<GcHeader>, visitor: &mut GcVisitor) {
        let gc_box = header.cast::<Self>();
        // SAFETY: the header is the first field of a `GcBox<T>` (repr(C)).
        unsafe { gc_box.as_ref().value.trace(visitor) }
    }

    unsafe fn drop_fn_for(header: NonNull<GcHeader>) {
        let gc_box = header.cast::<Self>().as_ptr();
        // SAFETY: called once by the sweep; no live handle can reach the value.
        unsafe { ManuallyDrop::drop(&mut *addr_of_mut!((*gc_box).value)) }
    }

    unsafe fn dealloc_fn_for(header: NonNull<GcHeader>) {
        // SAFETY: the box came from `Box::leak` in `allocate`; the value is
        // `ManuallyDrop`, so only the header is dropped here.
        drop(unsafe { Box::from_raw(header.cast::<Self>().as_ptr()) });
    }
}

/// Identity of an allocation, derived from its address.
///
/// Stable for as long as any `Gc` or `Weak` handle to the allocation exists,
/// so it never aliases another object while it is in use as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    fn of(header: NonNull<GcHeader>) -> Self {
        Self(header.as_ptr().addr())
    }
}

// ============================================================================
// Gc<T>
// ============================================================================

/// A garbage-collected handle to a value of type `T`.
///
/// Handles are created by [`Heap::alloc`](crate::Heap::alloc). While any
/// handle outside the heap exists, the value and everything reachable from it
/// survive collection.
///
/// `Gc<T>` is `!Send` and `!Sync`.
///
/// # Panics
///
/// Dereferencing a "dead" `Gc` panics. A `Gc` is dead when its value has been
/// collected, which safe code can only observe from a `Drop` impl running
/// during a sweep. Use [`Gc::try_deref`] or [`Gc::is_dead`] there.
///
/// # Examples
///
/// ```
/// use evanesce::{Gc, Heap};
///
/// let heap = Heap::new();
/// let x = heap.alloc(42);
/// assert_eq!(*x, 42);
///
/// let y = Gc::clone(&x);
/// assert!(Gc::ptr_eq(&x, &y));
/// ```
pub struct Gc<T> {
    ptr: NonNull<GcBox<T>>,
    _marker: PhantomData<*const ()>,
}

impl<T> Gc<T> {
    pub(crate) const fn from_box(ptr: NonNull<GcBox<T>>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    pub(crate) const fn header_ptr(gc: &Self) -> NonNull<GcHeader> {
        gc.ptr.cast()
    }

    fn value_ptr(&self) -> *const T {
        // SAFETY: the allocation outlives every handle; no reference to the
        // value is created.
        unsafe { addr_of!((*self.ptr.as_ptr()).value) }.cast::<T>()
    }

    fn header(&self) -> &GcHeader {
        // SAFETY: a Gc keeps its allocation alive and its value undropped
        // outside of a sweep.
        unsafe { &self.ptr.as_ref().header }
    }
}

impl<T: Trace + 'static> Gc<T> {
    /// Returns a raw pointer to the value.
    #[must_use]
    pub fn as_ptr(gc: &Self) -> *const T {
        gc.value_ptr()
    }

    /// Returns `true` if the value has been collected.
    ///
    /// Only a `Drop` impl running during a sweep can hold a dead `Gc`.
    #[must_use]
    pub fn is_dead(gc: &Self) -> bool {
        gc.header().is_dead()
    }

    /// Borrow the value, or `None` if it has been collected.
    #[must_use]
    pub fn try_deref(gc: &Self) -> Option<&T> {
        if Self::is_dead(gc) {
            None
        } else {
            Some(&**gc)
        }
    }

    /// Returns `true` if both handles point to the same allocation.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// The identity of this allocation.
    #[must_use]
    pub fn id(gc: &Self) -> ObjectId {
        ObjectId::of(Self::header_ptr(gc))
    }

    /// Number of `Gc` handles to this allocation, including ones held inside
    /// other heap objects.
    #[must_use]
    pub fn ref_count(gc: &Self) -> usize {
        gc.header().ref_count()
    }

    /// Number of `Weak` handles to this allocation.
    #[must_use]
    pub fn weak_count(gc: &Self) -> usize {
        gc.header().weak_count()
    }

    /// Create a `Weak` handle to this allocation.
    #[must_use]
    pub fn downgrade(gc: &Self) -> Weak<T> {
        gc.header().inc_weak();
        Weak {
            ptr: gc.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T> Deref for Gc<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        assert!(
            !self.header().is_dead(),
            "dereferenced a Gc whose value has been collected"
        );
        // SAFETY: not dead, so the sweep has not dropped the value.
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T> Clone for Gc<T> {
    #[inline]
    fn clone(&self) -> Self {
        self.header().inc_ref();
        Self::from_box(self.ptr)
    }
}

impl<T> Drop for Gc<T> {
    fn drop(&mut self) {
        let header = self.header();
        if header.dec_ref() && !header.is_dead() {
            if let Some(heap) = header.heap.upgrade() {
                heap.note_unreferenced();
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display> fmt::Display for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T> fmt::Pointer for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.value_ptr(), f)
    }
}

impl<T: PartialEq> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: Eq> Eq for Gc<T> {}

impl<T> AsRef<T> for Gc<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T> std::borrow::Borrow<T> for Gc<T> {
    fn borrow(&self) -> &T {
        self
    }
}

// ============================================================================
// Weak<T>
// ============================================================================

/// A weak handle to a garbage-collected value.
///
/// A `Weak` never keeps its target alive. It stays resolvable until a
/// collection finds the target unreachable; after that, [`Weak::upgrade`]
/// returns `None` and [`Weak::is_alive`] returns `false` for good.
///
/// # Examples
///
/// ```
/// use evanesce::{Gc, Heap};
///
/// let heap = Heap::new();
/// let strong = heap.alloc(String::from("x"));
/// let weak = Gc::downgrade(&strong);
/// assert!(weak.is_alive());
///
/// drop(strong);
/// heap.collect_full();
/// assert!(weak.upgrade().is_none());
/// ```
pub struct Weak<T> {
    ptr: NonNull<GcBox<T>>,
    _marker: PhantomData<*const ()>,
}

impl<T> Weak<T> {
    fn header(&self) -> &GcHeader {
        // SAFETY: a Weak keeps the allocation (not the value) alive.
        unsafe { &self.ptr.as_ref().header }
    }
}

impl<T: Trace + 'static> Weak<T> {
    /// Attempt to upgrade to a strong `Gc<T>` handle.
    ///
    /// Returns `None` if the value has been collected.
    #[must_use]
    pub fn upgrade(&self) -> Option<Gc<T>> {
        let header = self.header();
        if header.is_dead() {
            return None;
        }
        header.inc_ref();
        Some(Gc::from_box(self.ptr))
    }

    /// Returns `true` if the target has not been collected.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.header().is_dead()
    }

    /// Number of `Gc` handles to the target, or 0 once it is collected.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        let header = self.header();
        if header.is_dead() {
            0
        } else {
            header.ref_count()
        }
    }

    /// Number of `Weak` handles to the allocation.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.header().weak_count()
    }

    /// The identity of the allocation this handle points to.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        ObjectId::of(self.ptr.cast())
    }

    /// Returns `true` if the two `Weak`s point to the same allocation.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        self.header().inc_weak();
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        let header_ptr = self.ptr.cast::<GcHeader>();
        let header = self.header();
        if header.dec_weak() && header.has(GcHeader::ORPHANED) {
            // SAFETY: an orphaned allocation has a dropped value and no Gc
            // handles; this was the last Weak.
            unsafe { GcHeader::dealloc(header_ptr) };
        }
    }
}

impl<T> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.header().is_dead() {
            f.write_str("(Weak, collected)")
        } else {
            f.write_str("(Weak)")
        }
    }
}
