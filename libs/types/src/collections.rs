//! Small concurrent containers.
//!
//! `BiMap` keeps a many-to-one relation queryable from both sides (edge id
//! ⇌ frontier id). `MapMap` is an id → {sub id → value} index (edge id →
//! {stream id → pair}). Both hold their maps behind a single mutex so the
//! two directions can never disagree.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

#[derive(Debug)]
struct BiMapInner<L, R> {
    forward: HashMap<L, R>,
    backward: HashMap<R, HashSet<L>>,
}

/// Many-to-one map with reverse lookup
#[derive(Debug)]
pub struct BiMap<L, R> {
    inner: Mutex<BiMapInner<L, R>>,
}

impl<L, R> Default for BiMap<L, R> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(BiMapInner {
                forward: HashMap::new(),
                backward: HashMap::new(),
            }),
        }
    }
}

impl<L, R> BiMap<L, R>
where
    L: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `left` to `right`, replacing any previous mapping of `left`
    pub fn insert(&self, left: L, right: R) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.forward.insert(left.clone(), right.clone()) {
            if let Some(lefts) = inner.backward.get_mut(&previous) {
                lefts.remove(&left);
                if lefts.is_empty() {
                    inner.backward.remove(&previous);
                }
            }
        }
        inner.backward.entry(right).or_default().insert(left);
    }

    pub fn get_by_left(&self, left: &L) -> Option<R> {
        self.inner.lock().forward.get(left).cloned()
    }

    pub fn get_by_right(&self, right: &R) -> Vec<L> {
        self.inner
            .lock()
            .backward
            .get(right)
            .map(|lefts| lefts.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove_left(&self, left: &L) -> Option<R> {
        let mut inner = self.inner.lock();
        let right = inner.forward.remove(left)?;
        if let Some(lefts) = inner.backward.get_mut(&right) {
            lefts.remove(left);
            if lefts.is_empty() {
                inner.backward.remove(&right);
            }
        }
        Some(right)
    }

    /// Drop every left mapped to `right`, returning them
    pub fn remove_right(&self, right: &R) -> Vec<L> {
        let mut inner = self.inner.lock();
        let lefts = inner.backward.remove(right).unwrap_or_default();
        for left in &lefts {
            inner.forward.remove(left);
        }
        lefts.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Two-level keyed map
#[derive(Debug)]
pub struct MapMap<K, S, V> {
    inner: Mutex<HashMap<K, HashMap<S, V>>>,
}

impl<K, S, V> Default for MapMap<K, S, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, S, V> MapMap<K, S, V>
where
    K: Eq + Hash + Clone,
    S: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: K, sub: S, value: V) -> Option<V> {
        self.inner.lock().entry(key).or_default().insert(sub, value)
    }

    pub fn get(&self, key: &K, sub: &S) -> Option<V> {
        self.inner.lock().get(key)?.get(sub).cloned()
    }

    pub fn remove(&self, key: &K, sub: &S) -> Option<V> {
        let mut inner = self.inner.lock();
        let subs = inner.get_mut(key)?;
        let value = subs.remove(sub);
        if subs.is_empty() {
            inner.remove(key);
        }
        value
    }

    /// Remove and return everything under `key`
    pub fn remove_all(&self, key: &K) -> Vec<V> {
        self.inner
            .lock()
            .remove(key)
            .map(|subs| subs.into_values().collect())
            .unwrap_or_default()
    }

    pub fn values(&self, key: &K) -> Vec<V> {
        self.inner
            .lock()
            .get(key)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of sub entries under `key`
    pub fn count(&self, key: &K) -> usize {
        self.inner.lock().get(key).map(|subs| subs.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values().map(|subs| subs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
