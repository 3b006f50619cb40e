//! Integration tests for `WeakMap`.

use std::cell::RefCell;
use std::rc::Rc;

use evanesce::{never_collect, CollectInfo, Gc, GcCell, Heap, Trace, WeakMap};

fn upcase(heap: &Heap, s: &str) -> Gc<String> {
    heap.alloc(s.to_uppercase())
}

fn strings<'a>(items: impl IntoIterator<Item = &'a Gc<String>>) -> Vec<String> {
    items.into_iter().map(|s| (**s).clone()).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_collected_value_removes_entry() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let key = upcase(&heap, "a");
    let value = heap.alloc(String::from("x"));
    map.insert(&key, &value);
    assert_eq!(map.get(&key).as_deref().map(String::as_str), Some("x"));

    drop(value);
    heap.collect_full();

    assert!(map.get(&key).is_none());
    assert!(!map.contains_key(&key));
    assert!(!map.include(&key));
    assert!(!map.member(&key));
    assert_eq!(map.size(), 0);
    assert_eq!(map.len(), 0);
    assert_eq!(map.length(), 0);
    assert!(map.is_empty());
    assert_eq!(map.keys().count(), 0);
    assert_eq!(map.values().count(), 0);
}

#[test]
fn test_only_live_pairs_are_visited() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let a = heap.alloc(String::from("A"));
    let b = heap.alloc(String::from("B"));
    let x = heap.alloc(String::from("X"));
    let y = heap.alloc(String::from("Y"));
    map.insert(&a, &x);
    map.insert(&b, &y);

    drop(y);
    heap.collect_full();

    assert!(!map.contains_key(&b));

    let mut pairs = Vec::new();
    map.each_pair(|k, v| pairs.push(((**k).clone(), (**v).clone())));
    assert_eq!(pairs, [(String::from("A"), String::from("X"))]);

    let mut keys = Vec::new();
    map.each_key(|k| keys.push((**k).clone()));
    assert_eq!(keys, ["A"]);

    let mut values = Vec::new();
    map.each_value(|v| values.push((**v).clone()));
    assert_eq!(values, ["X"]);
}

// ============================================================================
// Reclamation
// ============================================================================

#[test]
fn test_collected_key_removes_entry() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let k1 = heap.alloc(1_u32);
    let k2 = heap.alloc(2_u32);
    let v1 = heap.alloc(String::from("one"));
    let v2 = heap.alloc(String::from("two"));
    map.insert(&k1, &v1);
    map.insert(&k2, &v2);
    assert_eq!(map.len(), 2);

    let weak_k1 = Gc::downgrade(&k1);
    drop(k1);
    heap.collect_full();

    assert!(!weak_k1.is_alive());
    assert_eq!(map.len(), 1);
    assert!(map.keys().all(|k| *k == 2));
    // The value is still strongly held; only the association is gone.
    assert_eq!(&*v1, "one");
    assert_eq!(Gc::weak_count(&v1), 0);
    assert_eq!(map.prune(), 0);
}

#[test]
fn test_collected_value_with_live_key() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let key = heap.alloc(String::from("kept"));
    let value = heap.alloc(vec![1, 2, 3]);
    map.insert(&key, &value);

    drop(value);
    heap.collect_full();

    assert!(map.get(&key).is_none());
    assert_eq!(map.len(), 0);
    assert_eq!(&*key, "kept");
    assert_eq!(Gc::weak_count(&key), 0);
}

#[test]
fn test_map_does_not_retain_keys_or_values() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let key = heap.alloc(String::from("k"));
    let value = heap.alloc(String::from("v"));
    let weak_key = Gc::downgrade(&key);
    let weak_value = Gc::downgrade(&value);
    map.insert(&key, &value);

    drop(key);
    drop(value);
    heap.collect_full();

    assert!(!weak_key.is_alive());
    assert!(!weak_value.is_alive());
    assert!(map.is_empty());
}

#[test]
fn test_value_reachable_from_key_dies_with_it() {
    #[derive(Trace)]
    struct Owner {
        payload: Gc<String>,
    }

    let heap = Heap::new();
    let mut map = WeakMap::new();

    let payload = heap.alloc(String::from("payload"));
    let owner = heap.alloc(Owner {
        payload: Gc::clone(&payload),
    });
    map.insert(&owner, &payload);

    // The owner keeps the value alive.
    drop(payload);
    heap.collect_full();
    assert_eq!(map.get(&owner).as_deref().map(String::as_str), Some("payload"));

    let weak_owner = Gc::downgrade(&owner);
    drop(owner);
    heap.collect_full();
    assert!(!weak_owner.is_alive());
    assert!(map.is_empty());
}

#[test]
fn test_map_inside_heap_object_holds_nothing() {
    let heap = Heap::new();
    let holder = heap.alloc(GcCell::new(WeakMap::new()));

    let key = heap.alloc(7_u64);
    let value = heap.alloc(8_u64);
    let weak_value = Gc::downgrade(&value);
    holder.borrow_mut().insert(&key, &value);

    drop(value);
    heap.collect_full();

    assert!(!weak_value.is_alive());
    assert!(holder.borrow().get(&key).is_none());
}

#[test]
fn test_entries_across_heaps() {
    let heap_a = Heap::new();
    let heap_b = Heap::new();
    let mut map = WeakMap::new();

    let key_a = heap_a.alloc(String::from("a"));
    let key_b = heap_b.alloc(String::from("b"));
    let value_a = heap_a.alloc(1_i32);
    let value_b = heap_b.alloc(2_i32);
    map.insert(&key_a, &value_a);
    map.insert(&key_b, &value_b);

    drop(value_b);
    heap_a.collect_full();
    assert_eq!(map.len(), 2);

    heap_b.collect_full();
    assert_eq!(map.len(), 1);
    assert!(map.contains_key(&key_a));
}

#[test]
fn test_map_outlives_heap() {
    let mut map = WeakMap::new();
    let key;
    {
        let heap = Heap::new();
        key = heap.alloc(String::from("leaked"));
        let value = heap.alloc(String::from("dropped"));
        map.insert(&key, &value);
    }

    // Dropping the heap collected the unrooted value; the rooted key leaked.
    assert_eq!(&*key, "leaked");
    assert!(map.get(&key).is_none());
    assert!(map.is_empty());
}

// ============================================================================
// Testable properties
// ============================================================================

#[test]
fn test_key_collection_shrinks_size_by_one() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let keys: Vec<_> = (0..5_u32).map(|i| heap.alloc(i)).collect();
    let values: Vec<_> = (0..5_u32).map(|i| heap.alloc(i * 10)).collect();
    for (k, v) in keys.iter().zip(&values) {
        map.insert(k, v);
    }
    assert_eq!(map.len(), 5);

    let mut keys = keys;
    let victim = keys.remove(2);
    let victim_id = Gc::id(&victim);
    drop(victim);
    heap.collect_full();

    assert_eq!(map.len(), 4);
    assert!(map.keys().all(|k| Gc::id(&k) != victim_id));
    for k in &keys {
        assert!(map.contains_key(k));
        assert!(map.include(k));
        assert!(map.member(k));
    }
}

#[test]
fn test_value_collection_removes_entry_with_live_key() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let keys: Vec<_> = (0..3_u32).map(|i| heap.alloc(i)).collect();
    let mut values: Vec<_> = (0..3_u32).map(|i| heap.alloc(i)).collect();
    for (k, v) in keys.iter().zip(&values) {
        map.insert(k, v);
    }

    values.remove(0);
    heap.collect_full();

    assert!(!map.contains_key(&keys[0]));
    assert!(map.contains_key(&keys[1]));
    assert!(map.contains_key(&keys[2]));
    assert_eq!(map.len(), 2);
}

#[test]
fn test_iteration_forms_agree() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let keys: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|s| heap.alloc(String::from(s)))
        .collect();
    let mut values: Vec<_> = ["1", "2", "3", "4"]
        .into_iter()
        .map(|s| heap.alloc(String::from(s)))
        .map(Some)
        .collect();
    for (k, v) in keys.iter().zip(&values) {
        if let Some(v) = v {
            map.insert(k, v);
        }
    }
    values[1] = None;
    values[3] = None;
    heap.collect_full();

    let pairs: Vec<_> = map.iter().collect();
    let pair_keys = strings(pairs.iter().map(|(k, _)| k));
    let pair_values = strings(pairs.iter().map(|(_, v)| v));

    assert_eq!(pair_keys, ["a", "c"]);
    assert_eq!(pair_values, ["1", "3"]);
    assert_eq!(strings(&map.keys().collect::<Vec<_>>()), pair_keys);
    assert_eq!(strings(&map.values().collect::<Vec<_>>()), pair_values);

    let mut each = Vec::new();
    map.each(|k, v| each.push(((**k).clone(), (**v).clone())));
    let mut each_keys = Vec::new();
    map.each_key(|k| each_keys.push((**k).clone()));
    let mut each_values = Vec::new();
    map.each_value(|v| each_values.push((**v).clone()));

    assert_eq!(each.len(), map.len());
    assert_eq!(each_keys, pair_keys);
    assert_eq!(each_values, pair_values);
}

#[test]
fn test_reads_are_idempotent() {
    let heap = Heap::with_collect_condition(never_collect);
    let mut map = WeakMap::new();

    let k = heap.alloc(1_u8);
    let v = heap.alloc(2_u8);
    let other = heap.alloc(3_u8);
    map.insert(&k, &v);

    assert_eq!(map.len(), map.len());
    assert_eq!(map.get(&k), map.get(&k));
    assert_eq!(map.get(&other), map.get(&other));
    assert_eq!(
        map.iter().collect::<Vec<_>>(),
        map.iter().collect::<Vec<_>>()
    );
    assert_eq!(
        map.keys().map(|k| Gc::id(&k)).collect::<Vec<_>>(),
        map.keys().map(|k| Gc::id(&k)).collect::<Vec<_>>()
    );
}

#[test]
fn test_overwrite_releases_old_value() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let key = heap.alloc(String::from("k"));
    let old = heap.alloc(String::from("old"));
    let new = heap.alloc(String::from("new"));
    let weak_old = Gc::downgrade(&old);

    assert!(map.insert(&key, &old).is_none());
    let previous = map.insert(&key, &new);
    assert_eq!(previous.as_deref().map(String::as_str), Some("old"));
    drop(previous);
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&key).as_deref().map(String::as_str), Some("new"));

    drop(old);
    heap.collect_full();

    assert!(!weak_old.is_alive());
    assert_eq!(map.get(&key).as_deref().map(String::as_str), Some("new"));
}

#[test]
fn test_overwrite_with_dead_previous_value_returns_none() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let key = heap.alloc(0_i64);
    let first = heap.alloc(1_i64);
    map.insert(&key, &first);
    drop(first);
    heap.collect_full();

    let second = heap.alloc(2_i64);
    assert!(map.insert(&key, &second).is_none());
    assert_eq!(map.get(&key).map(|v| *v), Some(2));
}

/// Inserts its pair into a shared map when the collector drops it.
#[derive(Trace)]
struct Recorder {
    key: Gc<u32>,
    value: Gc<u32>,
    #[evanesce(skip)]
    map: Rc<RefCell<WeakMap<u32, u32>>>,
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.map.borrow_mut().insert(&self.key, &self.value);
    }
}

#[test]
fn test_insert_from_destructor_skips_collected_pair() {
    let heap = Heap::with_collect_condition(never_collect);
    let map = Rc::new(RefCell::new(WeakMap::new()));

    let recorder = heap.alloc(Recorder {
        key: heap.alloc(1),
        value: heap.alloc(2),
        map: Rc::clone(&map),
    });
    drop(recorder);
    heap.collect_full();
    assert_eq!(heap.object_count(), 0);

    let map = map.borrow();
    let mut visited = 0;
    map.each_pair(|_, _| visited += 1);
    assert_eq!(visited, 0);
    assert_eq!(map.keys().count(), 0);
    assert_eq!(map.len(), 0);
    assert!(map.is_empty());
}

#[test]
fn test_insert_from_destructor_keeps_live_pair() {
    let heap = Heap::with_collect_condition(never_collect);
    let map = Rc::new(RefCell::new(WeakMap::new()));

    let key = heap.alloc(1);
    let value = heap.alloc(2);
    let recorder = heap.alloc(Recorder {
        key: key.clone(),
        value: value.clone(),
        map: Rc::clone(&map),
    });
    drop(recorder);
    heap.collect_full();

    let map = map.borrow();
    assert_eq!(map.len(), 1);
    assert_eq!(map.keys().count(), 1);
    assert_eq!(map.get(&key).map(|v| *v), Some(2));
    assert!(Gc::ptr_eq(&map.values().next().expect("live value"), &value));
}

#[test]
fn test_insert_of_collected_value_drops_existing_entry() {
    let heap = Heap::with_collect_condition(never_collect);
    let map = Rc::new(RefCell::new(WeakMap::new()));

    let key = heap.alloc(1);
    let old = heap.alloc(0);
    map.borrow_mut().insert(&key, &old);

    let recorder = heap.alloc(Recorder {
        key: key.clone(),
        value: heap.alloc(2),
        map: Rc::clone(&map),
    });
    drop(recorder);
    heap.collect_full();

    let map = map.borrow();
    assert!(map.get(&key).is_none());
    assert_eq!(map.len(), 0);
    assert_eq!(*old, 0);
}

// ============================================================================
// Ordering, removal, identity
// ============================================================================

#[test]
fn test_insertion_order_and_overwrite_position() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let keys: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|s| heap.alloc(String::from(s)))
        .collect();
    let values: Vec<_> = (0..4_i32).map(|i| heap.alloc(i)).collect();
    for (k, v) in keys.iter().zip(&values) {
        map.insert(k, v);
    }
    map.insert(&keys[0], &values[3]);

    assert_eq!(strings(&map.keys().collect::<Vec<_>>()), ["a", "b", "c"]);
    assert_eq!(map.values().map(|v| *v).collect::<Vec<_>>(), [3, 1, 2]);
    assert_eq!(map.keys().rev().map(|k| (*k).clone()).collect::<Vec<_>>(), ["c", "b", "a"]);
}

#[test]
fn test_remove_keeps_order_of_the_rest() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let keys: Vec<_> = (0..4_u32).map(|i| heap.alloc(i)).collect();
    let values: Vec<_> = (0..4_u32).map(|i| heap.alloc(i + 100)).collect();
    for (k, v) in keys.iter().zip(&values) {
        map.insert(k, v);
    }

    assert_eq!(map.remove(&keys[1]).map(|v| *v), Some(101));
    assert!(map.remove(&keys[1]).is_none());
    assert_eq!(map.keys().map(|k| *k).collect::<Vec<_>>(), [0, 2, 3]);
    assert_eq!(Gc::weak_count(&keys[1]), 0);
}

#[test]
fn test_keys_compare_by_identity() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let first = heap.alloc(String::from("same"));
    let second = heap.alloc(String::from("same"));
    let v1 = heap.alloc(1_u8);
    let v2 = heap.alloc(2_u8);
    map.insert(&first, &v1);
    map.insert(&second, &v2);

    assert_eq!(first, second);
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&first).map(|v| *v), Some(1));
    assert_eq!(map.get(&second).map(|v| *v), Some(2));
    assert_eq!(map.get(&Gc::clone(&first)).map(|v| *v), Some(1));
}

#[test]
fn test_absent_key() {
    let heap = Heap::new();
    let map: WeakMap<u32, u32> = WeakMap::new();
    let key = heap.alloc(1);
    assert!(map.get(&key).is_none());
    assert!(!map.contains_key(&key));
    assert!(map.is_empty());
}

#[test]
fn test_clear() {
    let heap = Heap::new();
    let mut map = WeakMap::with_capacity(4);
    let key = heap.alloc(1_u16);
    let value = heap.alloc(2_u16);
    map.insert(&key, &value);

    map.clear();
    assert!(map.is_empty());
    assert_eq!(Gc::weak_count(&key), 0);
    assert_eq!(Gc::weak_count(&value), 0);
}

// ============================================================================
// Iteration under collection
// ============================================================================

#[test]
fn test_collection_during_visit_does_not_tear_iteration() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let keys: Vec<_> = (0..3_u32).map(|i| heap.alloc(i)).collect();
    let mut values: Vec<_> = (0..3_u32).map(|i| heap.alloc(i * 2)).collect();
    for (k, v) in keys.iter().zip(&values) {
        map.insert(k, v);
    }

    let mut visited = Vec::new();
    map.each_pair(|k, v| {
        if visited.is_empty() {
            values.clear();
            heap.collect_full();
        }
        visited.push((**k, **v));
    });

    assert_eq!(visited, [(0, 0), (1, 2), (2, 4)]);

    heap.collect_full();
    assert!(map.is_empty());
}

#[test]
fn test_allocating_visitor() {
    fn always(_: &CollectInfo) -> bool {
        true
    }

    let heap = Heap::with_collect_condition(always);
    let mut map = WeakMap::new();

    let keys: Vec<_> = (0..4_u32).map(|i| heap.alloc(i)).collect();
    let values: Vec<_> = (0..4_u32).map(|i| heap.alloc(i)).collect();
    for (k, v) in keys.iter().zip(&values) {
        map.insert(k, v);
    }

    let mut scratch = Vec::new();
    map.each_value(|v| scratch.push(heap.alloc(**v + 1)));

    assert_eq!(scratch.iter().map(|g| **g).collect::<Vec<_>>(), [1, 2, 3, 4]);
    assert_eq!(map.len(), 4);
}

#[test]
fn test_iterator_snapshot_keeps_pairs_alive() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let key = heap.alloc(String::from("k"));
    let value = heap.alloc(String::from("v"));
    let weak_value = Gc::downgrade(&value);
    map.insert(&key, &value);

    let mut iter = map.iter();
    assert_eq!(iter.len(), 1);
    drop(value);
    heap.collect_full();

    let (k, v) = iter.next().expect("snapshot holds the pair");
    assert_eq!((k.as_str(), v.as_str()), ("k", "v"));
    drop((k, v, iter));

    heap.collect_full();
    assert!(!weak_value.is_alive());
    assert!(map.is_empty());
}

// ============================================================================
// Trait impls
// ============================================================================

#[test]
fn test_extend_and_into_iterator() {
    let heap = Heap::new();
    let keys: Vec<_> = (0..3_i32).map(|i| heap.alloc(i)).collect();
    let values: Vec<_> = (0..3_i32).map(|i| heap.alloc(-i)).collect();

    let mut map = WeakMap::default();
    map.extend(keys.iter().zip(&values));
    assert_eq!(map.len(), 3);

    let mut sum = 0;
    for (k, v) in &map {
        sum += *k + *v;
    }
    assert_eq!(sum, 0);
}

#[test]
fn test_debug_lists_live_pairs() {
    let heap = Heap::new();
    let mut map = WeakMap::new();

    let a = heap.alloc("a");
    let b = heap.alloc("b");
    let one = heap.alloc(1);
    let two = heap.alloc(2);
    map.insert(&a, &one);
    map.insert(&b, &two);
    assert_eq!(format!("{map:?}"), r#"{"a": 1, "b": 2}"#);

    drop(two);
    heap.collect_full();
    assert_eq!(format!("{map:?}"), r#"{"a": 1}"#);
}
