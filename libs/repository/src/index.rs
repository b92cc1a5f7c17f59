//! Secondary indexes shared by both stores.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Rows grouped by owner id, in insertion order within an owner
#[derive(Debug)]
pub(crate) struct Rows<T> {
    by_owner: HashMap<u64, Vec<T>>,
}

impl<T> Default for Rows<T> {
    fn default() -> Self {
        Self {
            by_owner: HashMap::new(),
        }
    }
}

impl<T> Rows<T> {
    pub(crate) fn push(&mut self, owner: u64, row: T) {
        self.by_owner.entry(owner).or_default().push(row);
    }

    pub(crate) fn owned_by(&self, owner: u64) -> &[T] {
        self.by_owner.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.by_owner.values().flatten()
    }

    /// Rows of `owner` when given, every row otherwise
    pub(crate) fn scan(&self, owner: Option<u64>) -> Box<dyn Iterator<Item = &T> + '_> {
        match owner {
            Some(owner) => Box::new(self.owned_by(owner).iter()),
            None => Box::new(self.iter()),
        }
    }

    /// Remove the rows of `owner` matching `doomed`, returning them
    pub(crate) fn remove_where(&mut self, owner: u64, doomed: impl Fn(&T) -> bool) -> Vec<T> {
        let Some(rows) = self.by_owner.get_mut(&owner) else {
            return Vec::new();
        };
        let (removed, kept): (Vec<T>, Vec<T>) = rows.drain(..).partition(|row| doomed(row));
        if kept.is_empty() {
            self.by_owner.remove(&owner);
        } else {
            *rows = kept;
        }
        removed
    }

    pub(crate) fn remove_owner(&mut self, owner: u64) -> Vec<T> {
        self.by_owner.remove(&owner).unwrap_or_default()
    }
}

/// Key → owner ids, kept sorted so lookups come back ordered by id
#[derive(Debug)]
pub(crate) struct OwnerIndex<K> {
    owners: HashMap<K, BTreeSet<u64>>,
}

impl<K> Default for OwnerIndex<K> {
    fn default() -> Self {
        Self {
            owners: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq> OwnerIndex<K> {
    pub(crate) fn insert(&mut self, key: K, owner: u64) {
        self.owners.entry(key).or_default().insert(owner);
    }

    pub(crate) fn remove(&mut self, key: &K, owner: u64) {
        if let Some(owners) = self.owners.get_mut(key) {
            owners.remove(&owner);
            if owners.is_empty() {
                self.owners.remove(key);
            }
        }
    }

    pub(crate) fn owners<Q>(&self, key: &Q) -> impl Iterator<Item = u64> + '_
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.owners.get(key).into_iter().flatten().copied()
    }

    pub(crate) fn contains<Q>(&self, key: &Q, owner: u64) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.owners.get(key).map_or(false, |owners| owners.contains(&owner))
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buckets_are_dropped() {
        let mut rows = Rows::default();
        rows.push(1, "a");
        rows.push(1, "b");
        assert_eq!(rows.remove_where(1, |r| *r == "a"), vec!["a"]);
        assert_eq!(rows.owned_by(1), &["b"]);
        rows.remove_where(1, |_| true);
        assert!(rows.by_owner.is_empty());

        let mut index = OwnerIndex::default();
        index.insert("reboot".to_string(), 3);
        index.insert("reboot".to_string(), 1);
        assert_eq!(index.owners("reboot").collect::<Vec<_>>(), vec![1, 3]);
        index.remove(&"reboot".to_string(), 1);
        index.remove(&"reboot".to_string(), 3);
        assert_eq!(index.keys(), 0);
    }
}
