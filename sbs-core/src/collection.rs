//! Ordered collections of uniquely keyed items.
//!
//! [`UniqueKeyedCollection`] backs every list and table shown to the user:
//! loaded measurements and the segments of one measurement. Items keep
//! their insertion order, no two items share a key, and subscribers are
//! notified once per operation that changed the collection.
//!
//! # Invariants
//!
//! 1. `index[key] == position` for every stored item.
//! 2. Keys are unique within one collection.
//! 3. Item keys only change through [`UniqueKeyedCollection::re_key`] or
//!    [`UniqueKeyedCollection::modify`], both of which update the index.
//! 4. A failed single-item operation leaves the collection unchanged.

use std::collections::HashMap;
use std::fmt;

use crate::{Error, Result};

/// An item with a stable string identity.
///
/// Two items with the same key are "the same" as far as a collection is
/// concerned: only one of them can be stored.
pub trait Keyed {
    /// The identifying key of this item.
    fn key(&self) -> &str;

    /// Overwrites the identifying key.
    ///
    /// Only called by the collection while re-keying; callers holding an
    /// item inside a collection cannot reach it directly.
    fn set_key(&mut self, key: String);
}

/// What kind of operation produced a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// One or more items were appended.
    Inserted,
    /// One or more items were removed.
    Removed,
    /// An item was edited in place without changing its key.
    Updated,
    /// An item's key changed.
    Rekeyed,
    /// All items were removed.
    Cleared,
}

/// Notification sent to subscribers after a mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    /// The operation that produced this change.
    pub kind: ChangeKind,
    /// Number of items after the change.
    pub len: usize,
}

/// Handle returned by [`UniqueKeyedCollection::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&Change)>;

/// Ordered collection enforcing key uniqueness, with change notification.
///
/// Subscribers are not `Send`, so a collection stays on the thread that
/// created it. Hand worker threads owned copies of the data they need.
pub struct UniqueKeyedCollection<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl<T> Default for UniqueKeyedCollection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for UniqueKeyedCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueKeyedCollection")
            .field("items", &self.items)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<T: Keyed> UniqueKeyedCollection<T> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the collection holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over the items in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Iterates over the keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(Keyed::key)
    }

    /// Returns true if an item with `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Looks up an item by key.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&position| &self.items[position])
    }

    /// Returns the item at `index`.
    ///
    /// # Errors
    /// [`Error::IndexOutOfRange`] if `index >= len()`.
    pub fn get_at(&self, index: usize) -> Result<&T> {
        self.items.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.items.len(),
        })
    }

    /// Returns the position of the item with `key`.
    ///
    /// # Errors
    /// [`Error::NotFound`] if no item has this key.
    pub fn index_of(&self, key: &str) -> Result<usize> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| Error::not_found(key))
    }

    /// Appends an item.
    ///
    /// # Errors
    /// [`Error::DuplicateKey`] if an item with the same key is present.
    pub fn add(&mut self, item: T) -> Result<()> {
        if self.contains(item.key()) {
            return Err(Error::duplicate(item.key()));
        }
        self.push(item);
        self.notify(ChangeKind::Inserted);
        Ok(())
    }

    /// Appends every item whose key is not yet present.
    ///
    /// Non-duplicate items are kept even when others are rejected, and
    /// subscribers are notified at most once.
    ///
    /// # Errors
    /// [`Error::DuplicateKey`] naming every rejected key.
    pub fn add_all<I>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut rejected = Vec::new();
        let before = self.items.len();
        for item in items {
            if self.contains(item.key()) {
                rejected.push(item.key().to_string());
            } else {
                self.push(item);
            }
        }
        if self.items.len() != before {
            self.notify(ChangeKind::Inserted);
        }
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(Error::DuplicateKey { keys: rejected })
        }
    }

    /// Removes and returns the item with `key`.
    ///
    /// # Errors
    /// [`Error::NotFound`] if no item has this key.
    pub fn remove(&mut self, key: &str) -> Result<T> {
        let item = self.take(key)?;
        self.notify(ChangeKind::Removed);
        Ok(item)
    }

    /// Removes every item whose key is present.
    ///
    /// # Errors
    /// [`Error::NotFound`] naming every key that was absent.
    pub fn remove_all<I, K>(&mut self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut missing = Vec::new();
        let mut removed = false;
        for key in keys {
            let key = key.as_ref();
            if self.take(key).is_ok() {
                removed = true;
            } else {
                missing.push(key.to_string());
            }
        }
        if removed {
            self.notify(ChangeKind::Removed);
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::NotFound { keys: missing })
        }
    }

    /// Removes and returns the item at `index`.
    ///
    /// # Errors
    /// [`Error::IndexOutOfRange`] if `index >= len()`.
    pub fn remove_at(&mut self, index: usize) -> Result<T> {
        let key = self.get_at(index)?.key().to_string();
        self.remove(&key)
    }

    /// Removes the items at the given positions.
    ///
    /// Positions refer to the collection before any removal. Nothing is
    /// removed if one of them is out of range.
    ///
    /// # Errors
    /// [`Error::IndexOutOfRange`] for the first position past the end.
    pub fn remove_all_at(&mut self, indices: &[usize]) -> Result<()> {
        let keys = indices
            .iter()
            .map(|&index| self.get_at(index).map(|item| item.key().to_string()))
            .collect::<Result<Vec<_>>>()?;
        let mut unique = keys;
        unique.sort_unstable();
        unique.dedup();
        self.remove_all(unique)
    }

    /// Changes the key of the item currently stored under `old_key`.
    ///
    /// Re-keying to the key an item already has is a no-op.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if `old_key` is absent.
    /// - [`Error::DuplicateKey`] if `new_key` belongs to another item; the
    ///   collection is left unchanged.
    pub fn re_key(&mut self, old_key: &str, new_key: impl Into<String>) -> Result<()> {
        let new_key = new_key.into();
        let position = self.index_of(old_key)?;
        if old_key == new_key {
            return Ok(());
        }
        if self.contains(&new_key) {
            return Err(Error::DuplicateKey {
                keys: vec![new_key],
            });
        }
        self.index.remove(old_key);
        self.items[position].set_key(new_key.clone());
        self.index.insert(new_key, position);
        self.notify(ChangeKind::Rekeyed);
        Ok(())
    }

    /// Edits the item stored under `key` in place.
    ///
    /// If `edit` changes the item's key the index follows it. Should the
    /// new key already belong to another item, the old key is written back
    /// and the other edits made by `edit` are kept.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if `key` is absent.
    /// - [`Error::DuplicateKey`] if the edited key collides.
    pub fn modify<R>(&mut self, key: &str, edit: impl FnOnce(&mut T) -> R) -> Result<R> {
        let (output, kind) = self.edit_in_place(key, |item| Ok::<_, Error>(edit(item)))?;
        self.notify(kind);
        Ok(output)
    }

    /// Like [`modify`](Self::modify) for edits that can fail.
    ///
    /// Subscribers are only notified when `edit` succeeds. A failed edit
    /// gets its key written back; it must not leave other partial changes.
    ///
    /// # Errors
    /// The error returned by `edit`, or the errors of `modify`.
    pub fn try_modify<R, E>(
        &mut self,
        key: &str,
        edit: impl FnOnce(&mut T) -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E>
    where
        E: From<Error>,
    {
        let (output, kind) = self.edit_in_place(key, edit)?;
        self.notify(kind);
        Ok(output)
    }

    /// Applies `edit` to the item under each key, continuing past failures.
    ///
    /// Subscribers get a single notification if at least one edit
    /// succeeded. Failures are returned with the key they belong to, in
    /// input order.
    pub fn modify_each<I, K, E, F>(&mut self, keys: I, mut edit: F) -> Vec<(String, E)>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        E: From<Error>,
        F: FnMut(&mut T) -> std::result::Result<(), E>,
    {
        let mut changed = None;
        let mut failures = Vec::new();
        for key in keys {
            let key = key.as_ref();
            match self.edit_in_place(key, &mut edit) {
                Ok(((), kind)) => {
                    if changed != Some(ChangeKind::Rekeyed) {
                        changed = Some(kind);
                    }
                }
                Err(e) => failures.push((key.to_string(), e)),
            }
        }
        if let Some(kind) = changed {
            self.notify(kind);
        }
        failures
    }

    /// Removes all items.
    pub fn clear(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.items.clear();
        self.index.clear();
        self.notify(ChangeKind::Cleared);
    }

    /// Registers a callback invoked after every change.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&Change) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    fn push(&mut self, item: T) {
        self.index.insert(item.key().to_string(), self.items.len());
        self.items.push(item);
    }

    fn take(&mut self, key: &str) -> Result<T> {
        let position = self.index.remove(key).ok_or_else(|| Error::not_found(key))?;
        let item = self.items.remove(position);
        for (shifted, later) in self.items.iter().enumerate().skip(position) {
            if let Some(slot) = self.index.get_mut(later.key()) {
                *slot = shifted;
            }
        }
        Ok(item)
    }

    /// Runs `edit` on the item under `key` and fixes up the index, without
    /// notifying.
    fn edit_in_place<R, E>(
        &mut self,
        key: &str,
        edit: impl FnOnce(&mut T) -> std::result::Result<R, E>,
    ) -> std::result::Result<(R, ChangeKind), E>
    where
        E: From<Error>,
    {
        let position = self.index_of(key)?;
        let item = &mut self.items[position];
        let outcome = edit(item);
        if item.key() == key {
            return outcome.map(|output| (output, ChangeKind::Updated));
        }

        let new_key = item.key().to_string();
        let output = match outcome {
            Ok(output) if !self.index.contains_key(&new_key) => output,
            Ok(_) => {
                item.set_key(key.to_string());
                return Err(Error::DuplicateKey {
                    keys: vec![new_key],
                }
                .into());
            }
            Err(e) => {
                item.set_key(key.to_string());
                return Err(e);
            }
        };
        self.index.remove(key);
        self.index.insert(new_key, position);
        Ok((output, ChangeKind::Rekeyed))
    }

    fn notify(&mut self, kind: ChangeKind) {
        let change = Change {
            kind,
            len: self.items.len(),
        };
        for (_, subscriber) in &mut self.subscribers {
            subscriber(&change);
        }
    }
}

impl<'a, T: Keyed> IntoIterator for &'a UniqueKeyedCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
