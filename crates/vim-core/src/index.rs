//! The ANN algorithm's consumed interface: upsert, delete, search, and a
//! couple of policy hooks. Log-index and status bookkeeping live on
//! `IndexHandle` (crate `vim-manager`); this trait covers only what the
//! algorithm itself must provide.
//!
//! Kept object-safe so the registry and lifecycle controller can hold
//! `Arc<dyn AnnIndex>` without knowing the concrete algorithm.

use std::sync::Arc;

use crate::error::ManagerResult;
use crate::types::{IndexParams, Region, SearchHit, VectorWithId};

pub trait AnnIndex: Send + Sync {
    fn upsert(&self, vectors: &[VectorWithId]) -> ManagerResult<()>;
    fn delete(&self, ids: &[u64]) -> ManagerResult<()>;
    fn search(&self, query: &[f32], top_k: usize) -> ManagerResult<Vec<SearchHit>>;
    fn count(&self) -> usize;

    /// Policy hooks consulted by the periodic scrub pass; concrete
    /// algorithms decide what "too far behind" means for their own data
    /// structure.
    fn need_rebuild(&self, lag: u64) -> bool;
    fn need_save(&self, lag: u64) -> bool;

    /// Opaque serialized state for the Snapshot Engine to persist. Paired
    /// with `IndexFactory::load`.
    fn save_state(&self) -> ManagerResult<Vec<u8>>;
}

/// Constructs algorithm instances: empty (for Builder / fresh regions) or
/// from previously-saved bytes (for Snapshot Engine `load`).
pub trait IndexFactory: Send + Sync {
    fn empty(&self, params: &IndexParams) -> Arc<dyn AnnIndex>;
    fn load(&self, params: &IndexParams, bytes: &[u8]) -> ManagerResult<Arc<dyn AnnIndex>>;
}

/// Convenience: construct an empty algorithm instance for a region via its
/// declared index parameters.
pub fn new_empty_index(factory: &dyn IndexFactory, region: &Region) -> Arc<dyn AnnIndex> {
    factory.empty(&region.index_params)
}
