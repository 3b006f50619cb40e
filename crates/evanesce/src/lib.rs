//! Weak key/value association maps over a garbage-collected heap.
//!
//! `evanesce` provides [`WeakMap<K, V>`], a map that associates
//! garbage-collected keys with garbage-collected values without keeping
//! either alive. Entries vanish as soon as a collection reclaims their key or
//! their value.
//!
//! Liveness comes from a small mark-sweep collector: objects live in a
//! [`Heap`], are reached through [`Gc<T>`] handles, and are observed without
//! being retained through [`Weak<T>`] handles. Types stored in the heap
//! implement [`Trace`], usually with `#[derive(Trace)]`.
//!
//! # Quick Start
//!
//! ```
//! use evanesce::{Heap, WeakMap};
//!
//! let heap = Heap::new();
//! let mut map = WeakMap::new();
//!
//! let a = heap.alloc("A");
//! let b = heap.alloc("B");
//! let x = heap.alloc("X");
//! let y = heap.alloc("Y");
//! map.insert(&a, &x);
//! map.insert(&b, &y);
//!
//! // Only the value side of `b`'s entry becomes unreachable.
//! drop(y);
//! heap.collect_full();
//!
//! assert!(!map.contains_key(&b));
//! let mut seen = Vec::new();
//! map.each_pair(|k, v| seen.push((**k, **v)));
//! assert_eq!(seen, [("A", "X")]);
//! ```
//!
//! # Collection
//!
//! Collection is cooperative and single-threaded. It runs at allocations and
//! [`Heap::safepoint`] when the heap's [`CollectCondition`] fires, on
//! [`Heap::collect_full`], and when the last `Heap` handle is dropped. A
//! `WeakMap` never allocates on the heap, so none of its operations can
//! trigger a collection.
//!
//! # Thread Safety
//!
//! `Gc<T>`, `Weak<T>`, `Heap` and `WeakMap` are `!Send` and `!Sync`.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

// Lets `#[derive(Trace)]` expand to `::evanesce::Trace` inside this crate.
extern crate self as evanesce;

pub mod cell;
mod gc;
mod heap;
mod metrics;
mod ptr;
mod trace;
mod tracing;
mod weak_map;

// Re-export public API
pub use cell::GcCell;
pub use crate::tracing::GcId;
pub use gc::{
    collection_epoch, default_collect_condition, never_collect, CollectCondition, CollectInfo,
};
pub use heap::Heap;
pub use metrics::{CollectionReason, GcMetrics};
pub use ptr::{Gc, ObjectId, Weak};
pub use trace::{Trace, Visitor};
pub use weak_map::{Iter, Keys, Values, WeakMap};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use evanesce_derive::Trace;
