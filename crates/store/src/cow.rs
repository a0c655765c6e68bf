//! Copy-on-write nested maps.
//!
//! `CowMap` wraps an `Arc<BTreeMap>`. Writers go through `Arc::make_mut`, so a
//! container still shared with a published snapshot is cloned on its first
//! write and mutated in place for the rest of the batch. Entries that are not
//! on a written path keep pointing at the previous snapshot's allocations.
//!
//! Nesting is expressed through [`Tree`]: a `CowMap<C>` addresses its leaves
//! with one more key than `C` does, and [`Slot`] terminates the path.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// A container addressable by a fixed-length key path.
pub trait Tree: Clone + Default {
    type Leaf: Clone;

    /// Number of keys needed to reach a leaf.
    const DEPTH: usize;

    fn lookup(&self, path: &[&str]) -> Option<&Self::Leaf>;

    /// Store `leaf` at `path`, creating intermediate containers. Returns the
    /// replaced leaf.
    fn insert(&mut self, path: &[&str], leaf: Self::Leaf) -> Option<Self::Leaf>;

    /// Remove the leaf at `path`, pruning every container it leaves empty.
    /// A miss is a no-op and clones nothing.
    fn remove(&mut self, path: &[&str]) -> Option<Self::Leaf>;

    fn is_vacant(&self) -> bool;
}

// ---- CowMap ----

pub struct CowMap<V>(Arc<BTreeMap<String, V>>);

impl<V> CowMap<V> {
    pub fn new() -> Self {
        Self(Arc::new(BTreeMap::new()))
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.0.values()
    }

    /// True when both maps share one allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<V: Clone> CowMap<V> {
    fn make_mut(&mut self) -> &mut BTreeMap<String, V> {
        Arc::make_mut(&mut self.0)
    }
}

impl<V> Clone for CowMap<V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<V> Default for CowMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for CowMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl<V: PartialEq> PartialEq for CowMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.0 == *other.0
    }
}

impl<V: Serialize> Serialize for CowMap<V> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<C: Tree> Tree for CowMap<C> {
    type Leaf = C::Leaf;
    const DEPTH: usize = C::DEPTH + 1;

    fn lookup(&self, path: &[&str]) -> Option<&Self::Leaf> {
        let (head, rest) = path.split_first()?;
        self.0.get(*head)?.lookup(rest)
    }

    fn insert(&mut self, path: &[&str], leaf: Self::Leaf) -> Option<Self::Leaf> {
        debug_assert_eq!(path.len(), Self::DEPTH, "key path length");
        let (head, rest) = path.split_first()?;
        self.make_mut().entry((*head).to_string()).or_default().insert(rest, leaf)
    }

    fn remove(&mut self, path: &[&str]) -> Option<Self::Leaf> {
        let (head, rest) = path.split_first()?;
        // probe before make_mut: a miss must not detach us from the snapshot
        self.0.get(*head)?.lookup(rest)?;
        let map = self.make_mut();
        let child = map.get_mut(*head)?;
        let removed = child.remove(rest);
        if child.is_vacant() {
            map.remove(*head);
        }
        removed
    }

    fn is_vacant(&self) -> bool {
        self.0.is_empty()
    }
}

// ---- Slot ----

/// Terminal position holding one shared leaf.
pub struct Slot<T>(Option<Arc<T>>);

impl<T> Slot<T> {
    pub fn get(&self) -> Option<&Arc<T>> {
        self.0.as_ref()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(v) => v.fmt(f),
            None => f.write_str("<vacant>"),
        }
    }
}

impl<T: PartialEq> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || **a == **b,
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Serialize> Serialize for Slot<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.as_deref().serialize(s)
    }
}

impl<T> Tree for Slot<T> {
    type Leaf = Arc<T>;
    const DEPTH: usize = 0;

    fn lookup(&self, path: &[&str]) -> Option<&Arc<T>> {
        if path.is_empty() {
            self.0.as_ref()
        } else {
            None
        }
    }

    fn insert(&mut self, path: &[&str], leaf: Arc<T>) -> Option<Arc<T>> {
        debug_assert!(path.is_empty(), "key path too long");
        self.0.replace(leaf)
    }

    fn remove(&mut self, path: &[&str]) -> Option<Arc<T>> {
        if path.is_empty() {
            self.0.take()
        } else {
            None
        }
    }

    fn is_vacant(&self) -> bool {
        self.0.is_none()
    }
}

/// Two-level map: `outer → inner → leaf`.
pub type Map2<T> = CowMap<CowMap<Slot<T>>>;
/// Three-level map: `a → b → c → leaf`.
pub type Map3<T> = CowMap<CowMap<CowMap<Slot<T>>>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Map2<u32> {
        let mut m: Map2<u32> = CowMap::new();
        m.insert(&["ns1", "a"], Arc::new(1));
        m.insert(&["ns1", "b"], Arc::new(2));
        m.insert(&["ns2", "c"], Arc::new(3));
        m
    }

    #[test]
    fn insert_clones_only_the_written_path() {
        let before = seeded();
        let mut after = before.clone();
        after.insert(&["ns1", "d"], Arc::new(4));
        assert!(!after.ptr_eq(&before));
        assert!(after.get("ns2").unwrap().ptr_eq(before.get("ns2").unwrap()));
        assert!(!after.get("ns1").unwrap().ptr_eq(before.get("ns1").unwrap()));
        assert_eq!(before.get("ns1").unwrap().len(), 2, "published snapshot untouched");
    }

    #[test]
    fn second_write_in_batch_reuses_the_clone() {
        let before = seeded();
        let mut after = before.clone();
        after.insert(&["ns1", "d"], Arc::new(4));
        let first = after.get("ns1").unwrap().clone();
        drop(first);
        let ptr_before = after.get("ns1").map(|m| m as *const _);
        after.insert(&["ns1", "e"], Arc::new(5));
        let ptr_after = after.get("ns1").map(|m| m as *const _);
        assert_eq!(ptr_before, ptr_after);
        assert_eq!(after.lookup(&["ns1", "e"]).map(|v| **v), Some(5));
    }

    #[test]
    fn remove_miss_keeps_identity() {
        let before = seeded();
        let mut after = before.clone();
        assert!(after.remove(&["ns1", "zzz"]).is_none());
        assert!(after.remove(&["nope", "a"]).is_none());
        assert!(after.ptr_eq(&before));
    }

    #[test]
    fn remove_prunes_empty_parents() {
        let mut m = seeded();
        assert_eq!(m.remove(&["ns2", "c"]).map(|v| *v), Some(3));
        assert!(!m.contains_key("ns2"));

        let mut deep: Map3<u32> = CowMap::new();
        deep.insert(&["a", "b", "c"], Arc::new(1));
        deep.remove(&["a", "b", "c"]);
        assert!(deep.is_empty());
    }

    #[test]
    fn depth_follows_nesting() {
        assert_eq!(<Map2<u32> as Tree>::DEPTH, 2);
        assert_eq!(<Map3<u32> as Tree>::DEPTH, 3);
    }
}
