//! A live, in-memory index for one region, plus the bookkeeping the manager
//! needs to keep it consistent with the replicated log: its current status,
//! how far it has replayed, and whether callers may currently use it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use vim_core::index::AnnIndex;
use vim_core::status::{transition_allowed, IndexStatus};
use vim_core::{ManagerError, ManagerResult, SearchHit, VectorWithId};

/// One region's live index handle.
///
/// `online` gates every data-plane call (`upsert`/`delete`/`search`):
/// while a rebuild holds the write-freeze window between its two replay
/// passes, the handle goes offline and callers get `ManagerError::Offline`
/// rather than racing the swap.
pub struct IndexHandle {
    region_id: u64,
    index: Arc<dyn AnnIndex>,
    status: Mutex<IndexStatus>,
    apply_log_index: AtomicU64,
    snapshot_log_index: AtomicU64,
    online: AtomicBool,
}

impl IndexHandle {
    pub fn new(
        region_id: u64,
        index: Arc<dyn AnnIndex>,
        apply_log_index: u64,
        snapshot_log_index: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            region_id,
            index,
            status: Mutex::new(IndexStatus::Loading),
            apply_log_index: AtomicU64::new(apply_log_index),
            snapshot_log_index: AtomicU64::new(snapshot_log_index),
            online: AtomicBool::new(false),
        })
    }

    pub fn region_id(&self) -> u64 {
        self.region_id
    }

    pub fn status(&self) -> IndexStatus {
        *self.status.lock()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn apply_log_index(&self) -> u64 {
        self.apply_log_index.load(Ordering::Acquire)
    }

    pub fn set_apply_log_index(&self, index: u64) {
        self.apply_log_index.store(index, Ordering::Release);
    }

    pub fn snapshot_log_index(&self) -> u64 {
        self.snapshot_log_index.load(Ordering::Acquire)
    }

    pub fn set_snapshot_log_index(&self, index: u64) {
        self.snapshot_log_index.store(index, Ordering::Release);
    }

    /// Validates `from -> to` against the status machine and swaps it in.
    /// Returns `ManagerError::InvalidTransition` without side effects if the
    /// transition is illegal, so the caller's own state is left untouched.
    pub fn set_status(&self, to: IndexStatus) -> ManagerResult<()> {
        let mut status = self.status.lock();
        if !transition_allowed(*status, to) {
            return Err(ManagerError::InvalidTransition {
                region_id: self.region_id,
                from: *status,
                to,
            });
        }
        *status = to;
        Ok(())
    }

    /// Atomic compare-and-set: only transitions if currently in `expected`.
    /// Used by `check_and_set_rebuild_status` to make "only one rebuild at a
    /// time" race-free without a separate outer lock.
    pub fn try_set_status(&self, expected: IndexStatus, to: IndexStatus) -> bool {
        let mut status = self.status.lock();
        if *status != expected || !transition_allowed(*status, to) {
            return false;
        }
        *status = to;
        true
    }

    pub fn index(&self) -> &Arc<dyn AnnIndex> {
        &self.index
    }

    fn require_online(&self) -> ManagerResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ManagerError::Offline(self.region_id))
        }
    }

    pub fn upsert(&self, vectors: &[VectorWithId]) -> ManagerResult<()> {
        self.require_online()?;
        self.index.upsert(vectors)
    }

    pub fn delete(&self, ids: &[u64]) -> ManagerResult<()> {
        self.require_online()?;
        self.index.delete(ids)
    }

    pub fn search(&self, query: &[f32], top_k: usize) -> ManagerResult<Vec<SearchHit>> {
        self.require_online()?;
        self.index.search(query, top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vim_core::index::IndexFactory;
    use vim_core::IndexParams;

    struct NullFactory;
    impl IndexFactory for NullFactory {
        fn empty(&self, params: &IndexParams) -> Arc<dyn AnnIndex> {
            Arc::new(vim_index_ref::FlatIndex::new(params.dimension))
        }
        fn load(&self, params: &IndexParams, bytes: &[u8]) -> ManagerResult<Arc<dyn AnnIndex>> {
            vim_index_ref::FlatIndexFactory.load(params, bytes)
        }
    }

    fn handle() -> Arc<IndexHandle> {
        let factory = NullFactory;
        let index = factory.empty(&IndexParams {
            dimension: 2,
            extra: Default::default(),
        });
        IndexHandle::new(1, index, 0, 0)
    }

    #[test]
    fn offline_handle_rejects_mutation_and_search() {
        let h = handle();
        assert!(matches!(
            h.upsert(&[VectorWithId::new(1, vec![0.0, 0.0])]),
            Err(ManagerError::Offline(1))
        ));
        assert!(matches!(h.search(&[0.0, 0.0], 1), Err(ManagerError::Offline(1))));
    }

    #[test]
    fn online_handle_serves_requests() {
        let h = handle();
        h.set_online(true);
        h.upsert(&[VectorWithId::new(1, vec![1.0, 0.0])]).unwrap();
        let hits = h.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].vector_id, 1);
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutating_state() {
        let h = handle();
        h.set_status(IndexStatus::Normal).unwrap();
        h.set_status(IndexStatus::Snapshotting).unwrap();
        assert!(h.set_status(IndexStatus::Rebuilding).is_err());
        assert_eq!(h.status(), IndexStatus::Snapshotting);
    }

    #[test]
    fn try_set_status_is_atomic_compare_and_swap() {
        let h = handle();
        h.set_status(IndexStatus::Normal).unwrap();
        assert!(h.try_set_status(IndexStatus::Normal, IndexStatus::Rebuilding));
        assert!(!h.try_set_status(IndexStatus::Normal, IndexStatus::Rebuilding));
        assert_eq!(h.status(), IndexStatus::Rebuilding);
    }
}
