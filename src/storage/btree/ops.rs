//! Value strategies for conditional writes.
//!
//! Every mutating entry point on the tree funnels through one of two
//! callbacks evaluated under the leaf lock: [`CreateOrUpdateValue`] for
//! inserts and updates, [`RemoveValue`] for removals.

use std::marker::PhantomData;

/// Decides what to store for a key, given whether it already exists.
pub trait CreateOrUpdateValue<K, V> {
    /// Called when `key` is absent. `None` leaves the tree unchanged.
    fn create_value(&mut self, key: &K) -> Option<V>;

    /// Called when `key` holds `current`. `None` leaves the value unchanged.
    fn update_value(&mut self, key: &K, current: &V) -> Option<V>;
}

/// Decides whether an existing entry may be removed.
pub trait RemoveValue<K, V> {
    /// Returns true to remove `key`.
    fn remove_value(&mut self, key: &K, value: &V) -> bool;
}

impl<K, V, F> RemoveValue<K, V> for F
where
    F: FnMut(&K, &V) -> bool,
{
    fn remove_value(&mut self, key: &K, value: &V) -> bool {
        self(key, value)
    }
}

/// Outcome of a [`CreateOrUpdateValue`] application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertResult<V> {
    /// The key was absent and this value was stored.
    Inserted(V),
    /// The key existed and now holds this value.
    Updated(V),
    /// The key exists with this value and was left alone.
    Exists(V),
    /// The key was absent and nothing was stored.
    NotFound,
}

impl<V> InsertResult<V> {
    /// Returns true if the tree changed.
    pub fn is_modified(&self) -> bool {
        matches!(self, InsertResult::Inserted(_) | InsertResult::Updated(_))
    }

    /// The value now associated with the key, if any.
    pub fn into_value(self) -> Option<V> {
        match self {
            InsertResult::Inserted(v) | InsertResult::Updated(v) | InsertResult::Exists(v) => {
                Some(v)
            }
            InsertResult::NotFound => None,
        }
    }
}

/// Outcome of a [`RemoveValue`] application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoveResult<V> {
    /// The entry was removed; this was its value.
    Removed(V),
    /// The entry exists but the strategy kept it.
    Ignored,
    /// The key was absent.
    NotFound,
}

impl<V> RemoveResult<V> {
    /// The removed value, if the entry was removed.
    pub fn removed(self) -> Option<V> {
        match self {
            RemoveResult::Removed(v) => Some(v),
            _ => None,
        }
    }
}

/// Inserts or overwrites.
#[derive(Clone, Debug)]
pub struct Upsert<V>(pub V);

impl<K, V: Clone> CreateOrUpdateValue<K, V> for Upsert<V> {
    fn create_value(&mut self, _key: &K) -> Option<V> {
        Some(self.0.clone())
    }

    fn update_value(&mut self, _key: &K, _current: &V) -> Option<V> {
        Some(self.0.clone())
    }
}

/// Inserts only when the key is absent.
#[derive(Clone, Debug)]
pub struct AddOnly<V>(pub V);

impl<K, V: Clone> CreateOrUpdateValue<K, V> for AddOnly<V> {
    fn create_value(&mut self, _key: &K) -> Option<V> {
        Some(self.0.clone())
    }

    fn update_value(&mut self, _key: &K, _current: &V) -> Option<V> {
        None
    }
}

/// Overwrites only when the key is present.
#[derive(Clone, Debug)]
pub struct UpdateOnly<V>(pub V);

impl<K, V: Clone> CreateOrUpdateValue<K, V> for UpdateOnly<V> {
    fn create_value(&mut self, _key: &K) -> Option<V> {
        None
    }

    fn update_value(&mut self, _key: &K, _current: &V) -> Option<V> {
        Some(self.0.clone())
    }
}

/// Overwrites only when the current value equals `expected`.
#[derive(Clone, Debug)]
pub struct UpdateIf<V> {
    /// Value to store.
    pub value: V,
    /// Value that must currently be stored.
    pub expected: V,
}

impl<K, V: Clone + PartialEq> CreateOrUpdateValue<K, V> for UpdateIf<V> {
    fn create_value(&mut self, _key: &K) -> Option<V> {
        None
    }

    fn update_value(&mut self, _key: &K, current: &V) -> Option<V> {
        (*current == self.expected).then(|| self.value.clone())
    }
}

/// Inserts a value produced by a factory when the key is absent.
pub struct FnCreate<F>(pub F);

impl<K, V, F> CreateOrUpdateValue<K, V> for FnCreate<F>
where
    F: FnMut(&K) -> V,
{
    fn create_value(&mut self, key: &K) -> Option<V> {
        Some((self.0)(key))
    }

    fn update_value(&mut self, _key: &K, _current: &V) -> Option<V> {
        None
    }
}

/// Updates through a callback that may decline by returning `None`.
pub struct FnUpdate<F>(pub F);

impl<K, V, F> CreateOrUpdateValue<K, V> for FnUpdate<F>
where
    F: FnMut(&K, &V) -> Option<V>,
{
    fn create_value(&mut self, _key: &K) -> Option<V> {
        None
    }

    fn update_value(&mut self, key: &K, current: &V) -> Option<V> {
        (self.0)(key, current)
    }
}

/// Inserts from one callback, updates through another.
pub struct AddOrUpdateWith<C, U, V> {
    create: C,
    update: U,
    _marker: PhantomData<fn() -> V>,
}

impl<C, U, V> AddOrUpdateWith<C, U, V> {
    /// Pairs a factory with an updater.
    pub fn new(create: C, update: U) -> Self {
        Self {
            create,
            update,
            _marker: PhantomData,
        }
    }
}

impl<K, V, C, U> CreateOrUpdateValue<K, V> for AddOrUpdateWith<C, U, V>
where
    C: FnMut(&K) -> V,
    U: FnMut(&K, &V) -> V,
{
    fn create_value(&mut self, key: &K) -> Option<V> {
        Some((self.create)(key))
    }

    fn update_value(&mut self, key: &K, current: &V) -> Option<V> {
        Some((self.update)(key, current))
    }
}
