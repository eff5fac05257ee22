//! The concurrent map from region id to live index handle.
//!
//! One `DashMap` shard lock per bucket, no global lock: a rebuild on region
//! A never blocks a lookup for region B. `put_if_exists` is the one
//! operation that needs to be atomic with respect to a concurrent delete —
//! a rebuild finishing after its region was deleted must not resurrect it.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::handle::IndexHandle;

#[derive(Default)]
pub struct IndexRegistry {
    handles: DashMap<u64, Arc<IndexHandle>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, region_id: u64) -> Option<Arc<IndexHandle>> {
        self.handles.get(&region_id).map(|r| r.clone())
    }

    pub fn contains(&self, region_id: u64) -> bool {
        self.handles.contains_key(&region_id)
    }

    /// Unconditionally inserts or replaces the handle for `region_id`.
    pub fn put(&self, region_id: u64, handle: Arc<IndexHandle>) {
        self.handles.insert(region_id, handle);
    }

    /// Installs `handle` only if `region_id` is already present, i.e. the
    /// region has not been deleted since the rebuild that produced `handle`
    /// started. Returns `false` (and leaves the map untouched) if the
    /// region is gone.
    pub fn put_if_exists(&self, region_id: u64, handle: Arc<IndexHandle>) -> bool {
        match self.handles.entry(region_id) {
            Entry::Occupied(mut e) => {
                e.insert(handle);
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn erase(&self, region_id: u64) -> Option<Arc<IndexHandle>> {
        self.handles.remove(&region_id).map(|(_, v)| v)
    }

    pub fn all_values(&self) -> Vec<Arc<IndexHandle>> {
        self.handles.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
