//! The primary KV store ("base engine"), consumed here only as a range-scan
//! API.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use vim_core::ManagerResult;

pub trait BaseEngine: Send + Sync {
    /// Returns entries in `[lower, upper)`, ordered by key. `Vec<u8>`'s
    /// `Ord` is byte-lexicographic, which is exactly the order the Codec's
    /// `encode_vector_id` promises.
    fn scan(&self, lower: &[u8], upper: &[u8]) -> ManagerResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory reference implementation backed by a `BTreeMap`, standing in
/// for an LSM-backed engine scanned through an iterator.
#[derive(Debug, Default)]
pub struct InMemoryBaseEngine {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryBaseEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.map.write().insert(key, value);
    }
}

impl BaseEngine for InMemoryBaseEngine {
    fn scan(&self, lower: &[u8], upper: &[u8]) -> ManagerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range(lower.to_vec()..upper.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vim_core::codec::{encode_vector_id, vector_scan_bounds};

    #[test]
    fn scan_returns_region_in_order() {
        let engine = InMemoryBaseEngine::new();
        engine.put(encode_vector_id(1, 2), b"b".to_vec());
        engine.put(encode_vector_id(1, 1), b"a".to_vec());
        engine.put(encode_vector_id(2, 0), b"other-region".to_vec());

        let (lower, upper) = vector_scan_bounds(1);
        let results = engine.scan(&lower, &upper).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1, b"a");
        assert_eq!(results[1].1, b"b");
    }
}
