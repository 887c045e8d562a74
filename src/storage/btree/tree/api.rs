//! The ordered-dictionary surface.
//!
//! Every mutation here is one atomic step at the leaf: the strategy is
//! evaluated under the leaf's write lock, and the change, its log record and
//! the count adjustment commit together.

use std::cmp::Ordering;

use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::cursor::{Entries, Keys};
use crate::storage::btree::ops::{
    AddOnly, AddOrUpdateWith, CreateOrUpdateValue, FnCreate, FnUpdate, InsertResult, RemoveResult,
    RemoveValue, UpdateIf, UpdateOnly, Upsert,
};
use crate::types::{Result, SylvaError};

use super::{BPlusTree, Seek};

impl<K: KeyCodec, V: ValCodec> BPlusTree<K, V> {
    /// Value stored for `key`, or [`SylvaError::NotFound`].
    pub fn get(&self, key: &K) -> Result<V> {
        self.try_get_value(key)?.ok_or(SylvaError::NotFound)
    }

    /// Value stored for `key`, if any.
    pub fn try_get_value(&self, key: &K) -> Result<Option<V>> {
        self.seek(key, |leaf, found, ordinal| {
            found.then(|| leaf.value(ordinal).clone())
        })
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.seek(key, |_, found, _| found)
    }

    /// Inserts a new entry; fails with [`SylvaError::DuplicateKey`] if the
    /// key exists.
    pub fn add(&self, key: K, value: V) -> Result<()> {
        match self.apply(key, &mut AddOnly(value))? {
            InsertResult::Inserted(_) => Ok(()),
            _ => Err(SylvaError::DuplicateKey),
        }
    }

    /// Inserts or overwrites.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        self.apply(key, &mut Upsert(value))?;
        Ok(())
    }

    /// Removes `key`; returns whether it was present.
    pub fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.try_remove(key)?.is_some())
    }

    /// Inserts only if `key` is absent.
    pub fn try_add(&self, key: K, value: V) -> Result<bool> {
        Ok(self.apply(key, &mut AddOnly(value))?.is_modified())
    }

    /// Inserts a value built by `factory` only if `key` is absent. The
    /// factory runs under the leaf lock, at most once.
    pub fn try_add_with<F>(&self, key: K, factory: F) -> Result<bool>
    where
        F: FnMut(&K) -> V,
    {
        Ok(self.apply(key, &mut FnCreate(factory))?.is_modified())
    }

    /// Overwrites only if `key` is present.
    pub fn try_update(&self, key: K, value: V) -> Result<bool> {
        Ok(self.apply(key, &mut UpdateOnly(value))?.is_modified())
    }

    /// Overwrites only if the current value equals `expected`.
    pub fn try_update_if(&self, key: K, value: V, expected: V) -> Result<bool>
    where
        V: PartialEq,
    {
        Ok(self
            .apply(key, &mut UpdateIf { value, expected })?
            .is_modified())
    }

    /// Replaces the value with what `update` returns; `None` keeps it.
    pub fn try_update_with<F>(&self, key: K, update: F) -> Result<bool>
    where
        F: FnMut(&K, &V) -> Option<V>,
    {
        Ok(self.apply(key, &mut FnUpdate(update))?.is_modified())
    }

    /// Removes `key` and returns its value.
    pub fn try_remove(&self, key: &K) -> Result<Option<V>> {
        Ok(self.remove_with(key, &mut |_: &K, _: &V| true)?.removed())
    }

    /// Removes `key` if `predicate` accepts its current value.
    pub fn try_remove_if<F>(&self, key: &K, mut predicate: F) -> Result<Option<V>>
    where
        F: FnMut(&K, &V) -> bool,
    {
        Ok(self.remove_with(key, &mut predicate)?.removed())
    }

    /// The stored value, inserting `value` first if `key` is absent.
    pub fn get_or_add(&self, key: K, value: V) -> Result<V> {
        self.apply(key, &mut AddOnly(value))?
            .into_value()
            .ok_or(SylvaError::Corruption("insert produced no value"))
    }

    /// The stored value, inserting `factory(key)` first if `key` is absent.
    pub fn get_or_add_with<F>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnMut(&K) -> V,
    {
        self.apply(key, &mut FnCreate(factory))?
            .into_value()
            .ok_or(SylvaError::Corruption("insert produced no value"))
    }

    /// Stores `add` for a new key, or `update(key, current)` for an existing
    /// one, and returns the stored value.
    pub fn add_or_update<U>(&self, key: K, add: V, update: U) -> Result<V>
    where
        U: FnMut(&K, &V) -> V,
    {
        self.add_or_update_with(key, move |_: &K| add.clone(), update)
    }

    /// Like [`BPlusTree::add_or_update`] with a factory for new keys.
    pub fn add_or_update_with<C, U>(&self, key: K, create: C, update: U) -> Result<V>
    where
        C: FnMut(&K) -> V,
        U: FnMut(&K, &V) -> V,
    {
        self.apply(key, &mut AddOrUpdateWith::new(create, update))?
            .into_value()
            .ok_or(SylvaError::Corruption("insert produced no value"))
    }

    /// Runs a custom insert/update strategy against `key`.
    pub fn apply<S>(&self, key: K, strategy: &mut S) -> Result<InsertResult<V>>
    where
        S: CreateOrUpdateValue<K, V> + ?Sized,
    {
        self.ensure_writable()?;
        let result = {
            let _call = self.read_call()?;
            self.apply_op(key, strategy, self.active_log())?
        };
        self.after_mutation(result.is_modified())?;
        Ok(result)
    }

    /// Runs a custom removal strategy against `key`.
    pub fn remove_with<S>(&self, key: &K, strategy: &mut S) -> Result<RemoveResult<V>>
    where
        S: RemoveValue<K, V> + ?Sized,
    {
        self.ensure_writable()?;
        let result = {
            let _call = self.read_call()?;
            self.remove_op(key, strategy, self.active_log())?
        };
        self.after_mutation(matches!(result, RemoveResult::Removed(_)))?;
        Ok(result)
    }

    /// Every entry in key order.
    pub fn iter(&self) -> Entries<'_, K, V> {
        Entries::new(self, Seek::First, None)
    }

    /// Every key in order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys::new(self.iter())
    }

    /// Entries with keys at or after `start`.
    pub fn enumerate_from(&self, start: K) -> Entries<'_, K, V> {
        Entries::new(self, Seek::From(start), None)
    }

    /// Entries with keys in `start..=end`.
    pub fn enumerate_range(&self, start: K, end: K) -> Entries<'_, K, V> {
        let comparer = self.options.key_comparer.clone();
        Entries::new(
            self,
            Seek::From(start),
            Some(Box::new(move |key: &K| {
                comparer(key, &end) != Ordering::Greater
            })),
        )
    }

    /// The smallest entry, or [`SylvaError::NotFound`] if empty.
    pub fn first(&self) -> Result<(K, V)> {
        self.try_get_first()?.ok_or(SylvaError::NotFound)
    }

    /// The largest entry, or [`SylvaError::NotFound`] if empty.
    pub fn last(&self) -> Result<(K, V)> {
        self.try_get_last()?.ok_or(SylvaError::NotFound)
    }

    /// The smallest entry, if any.
    pub fn try_get_first(&self) -> Result<Option<(K, V)>> {
        self.edge(true)
    }

    /// The largest entry, if any.
    pub fn try_get_last(&self) -> Result<Option<(K, V)>> {
        self.edge(false)
    }
}

impl<'t, K: KeyCodec, V: ValCodec> IntoIterator for &'t BPlusTree<K, V> {
    type Item = Result<(K, V)>;
    type IntoIter = Entries<'t, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
