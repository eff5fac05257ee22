//! Metadata store adapter: a thin wrapper over a key/value metadata engine.
//! All operations are individually atomic; no multi-key transaction is
//! required.

use dashmap::DashMap;
use vim_core::ManagerResult;

pub trait MetadataStore: Send + Sync {
    fn get(&self, key: &[u8]) -> ManagerResult<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> ManagerResult<()>;
    fn delete(&self, key: &[u8]) -> ManagerResult<()>;
}

/// In-memory reference implementation. Production deployments back this
/// with the same KV engine the rest of the store uses; this workspace's
/// concern is the manager above it, not that engine.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    map: DashMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get(&self, key: &[u8]) -> ManagerResult<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> ManagerResult<()> {
        self.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> ManagerResult<()> {
        self.map.remove(key);
        Ok(())
    }
}
