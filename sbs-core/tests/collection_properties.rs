//! Property tests for `UniqueKeyedCollection`.
//!
//! 1. Any sequence of add/remove ends in the same state as a plain ordered
//!    model of the same operations.
//! 2. Of two items with equal keys only the first is retained.
//! 3. `add_all` with one duplicate keeps `n - 1` new items and names the
//!    duplicate.
//! 4. After `re_key`, the new key resolves to the item's position and the
//!    old key no longer resolves.
//! 5. The key index always agrees with item positions.

use proptest::prelude::*;
use sbs_core::{Error, Keyed, UniqueKeyedCollection};

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    key: String,
    payload: u32,
}

impl Entry {
    fn new(key: u32, payload: u32) -> Self {
        Self {
            key: format!("k{key}"),
            payload,
        }
    }
}

impl Keyed for Entry {
    fn key(&self) -> &str {
        &self.key
    }

    fn set_key(&mut self, key: String) {
        self.key = key;
    }
}

#[derive(Debug, Clone)]
enum Op {
    Add(u32, u32),
    Remove(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..16, any::<u32>()).prop_map(|(k, v)| Op::Add(k, v)),
        (0u32..16).prop_map(Op::Remove),
    ]
}

fn assert_index_consistent(collection: &UniqueKeyedCollection<Entry>) {
    for (position, entry) in collection.iter().enumerate() {
        assert_eq!(collection.index_of(entry.key()).unwrap(), position);
        assert_eq!(collection.get(entry.key()), Some(entry));
    }
}

proptest! {
    #[test]
    fn add_remove_matches_ordered_model(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut collection = UniqueKeyedCollection::new();
        let mut model: Vec<Entry> = Vec::new();

        for op in &ops {
            match *op {
                Op::Add(k, v) => {
                    let entry = Entry::new(k, v);
                    let exists = model.iter().any(|e| e.key == entry.key);
                    let result = collection.add(entry.clone());
                    prop_assert_eq!(result.is_err(), exists);
                    if !exists {
                        model.push(entry);
                    }
                }
                Op::Remove(k) => {
                    let key = format!("k{k}");
                    let position = model.iter().position(|e| e.key == key);
                    let result = collection.remove(&key);
                    match position {
                        Some(p) => prop_assert_eq!(result.unwrap(), model.remove(p)),
                        None => prop_assert!(matches!(result, Err(Error::NotFound { .. })), "expected not found error"),
                    }
                }
            }
        }

        let actual: Vec<Entry> = collection.iter().cloned().collect();
        prop_assert_eq!(actual, model);
        assert_index_consistent(&collection);
    }

    #[test]
    fn equal_keys_retain_first(key in 0u32..100, a in any::<u32>(), b in any::<u32>()) {
        let mut collection = UniqueKeyedCollection::new();
        collection.add(Entry::new(key, a)).unwrap();
        let err = collection.add(Entry::new(key, b)).unwrap_err();

        let expected = format!("k{key}");
        prop_assert!(matches!(err, Error::DuplicateKey { ref keys } if keys == &[expected.clone()]), "expected duplicate key error");
        prop_assert_eq!(collection.len(), 1);
        prop_assert_eq!(collection.get(&expected).unwrap().payload, a);
    }

    #[test]
    fn add_all_with_one_duplicate(n in 2u32..20, dup in 0u32..20) {
        let dup = dup % n;
        let mut items: Vec<Entry> = (0..n).map(|k| Entry::new(k, k)).collect();
        items.push(Entry::new(dup, 999));

        let mut collection = UniqueKeyedCollection::new();
        let err = collection.add_all(items).unwrap_err();

        prop_assert_eq!(collection.len(), n as usize);
        prop_assert!(matches!(err, Error::DuplicateKey { ref keys } if keys == &[format!("k{dup}")]), "expected duplicate key error");
        prop_assert_eq!(collection.get(&format!("k{dup}")).unwrap().payload, dup);
    }

    #[test]
    fn re_key_moves_identity(n in 1u32..20, pick in 0u32..20, fresh in 100u32..200) {
        let pick = pick % n;
        let mut collection = UniqueKeyedCollection::new();
        collection.add_all((0..n).map(|k| Entry::new(k, k))).unwrap();

        let old = format!("k{pick}");
        let new = format!("k{fresh}");
        collection.re_key(&old, new.clone()).unwrap();

        prop_assert_eq!(collection.index_of(&new).unwrap(), pick as usize);
        prop_assert!(collection.index_of(&old).is_err());
        prop_assert_eq!(collection.get_at(pick as usize).unwrap().key(), new.as_str());
        assert_index_consistent(&collection);
    }

    #[test]
    fn re_key_onto_other_item_is_rejected(n in 2u32..20, a in 0u32..20, b in 0u32..20) {
        let (a, b) = (a % n, b % n);
        prop_assume!(a != b);
        let mut collection = UniqueKeyedCollection::new();
        collection.add_all((0..n).map(|k| Entry::new(k, k))).unwrap();
        let before: Vec<Entry> = collection.iter().cloned().collect();

        let result = collection.re_key(&format!("k{a}"), format!("k{b}"));

        prop_assert!(matches!(result, Err(Error::DuplicateKey { .. })), "expected duplicate key error");
        let after: Vec<Entry> = collection.iter().cloned().collect();
        prop_assert_eq!(after, before);
    }
}
