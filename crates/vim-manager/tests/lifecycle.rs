use std::collections::HashMap;
use std::sync::Arc;

use vim_core::codec::{encode_vector_id, encode_vector_value};
use vim_core::index::{AnnIndex, IndexFactory};
use vim_core::status::IndexStatus;
use vim_core::{IndexParams, ManagerError, ManagerResult, Region, VectorWithId};
use vim_index_ref::FlatIndexFactory;
use vim_manager::{Context, FsSnapshotEngine, IndexRegistry, LifecycleController, SnapshotEngine};
use vim_store::{BaseEngine, InMemoryBaseEngine, InMemoryClusterEngine, InMemoryMetadataStore, LogEntry, LogRequest};

/// A snapshot engine whose `save` always fails, standing in for a disk-full
/// or permission-denied condition so `rebuild`'s `need_save` abort path can
/// be exercised without actually breaking the filesystem.
struct FailingSaveSnapshotEngine;

impl SnapshotEngine for FailingSaveSnapshotEngine {
    fn save(
        &self,
        _region_id: u64,
        _snapshot_log_index: u64,
        _apply_log_index: u64,
        _index: &dyn AnnIndex,
    ) -> ManagerResult<()> {
        Err(ManagerError::Internal("disk full".to_string()))
    }

    fn load(
        &self,
        _region_id: u64,
        _params: &IndexParams,
        _index_factory: &dyn vim_core::index::IndexFactory,
    ) -> ManagerResult<Option<(Arc<dyn AnnIndex>, u64, u64)>> {
        Ok(None)
    }

    fn last_snapshot_log_id(&self, _region_id: u64) -> ManagerResult<Option<u64>> {
        Ok(None)
    }

    fn delete(&self, _region_id: u64) -> ManagerResult<()> {
        Ok(())
    }
}

/// A base engine whose `scan` always fails, used to force `build_vector_index`
/// to fail so `load_or_build`'s handle-restore path can be exercised.
struct FailingBaseEngine;

impl BaseEngine for FailingBaseEngine {
    fn scan(&self, _lower: &[u8], _upper: &[u8]) -> ManagerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Err(ManagerError::Internal("base storage unavailable".to_string()))
    }
}

fn region(id: u64) -> Region {
    Region::new(
        id,
        IndexParams {
            dimension: 2,
            extra: HashMap::new(),
        },
    )
}

struct Fixture {
    controller: LifecycleController,
    base_engine: Arc<InMemoryBaseEngine>,
    cluster_engine: Arc<InMemoryClusterEngine>,
    metadata_store: Arc<InMemoryMetadataStore>,
    registry: Arc<IndexRegistry>,
    _tmp: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(IndexRegistry::new());
    let base_engine = Arc::new(InMemoryBaseEngine::new());
    let metadata_store = Arc::new(InMemoryMetadataStore::new());
    let cluster_engine = Arc::new(InMemoryClusterEngine::new());
    let snapshot_engine = Arc::new(FsSnapshotEngine::new(tmp.path()));
    let index_factory = Arc::new(FlatIndexFactory);

    let ctx = Context::new(
        tmp.path().to_path_buf(),
        registry.clone(),
        base_engine.clone(),
        metadata_store.clone(),
        cluster_engine.clone(),
        snapshot_engine,
        index_factory,
    );
    Fixture {
        controller: LifecycleController::new(Arc::new(ctx)),
        base_engine,
        cluster_engine,
        metadata_store,
        registry,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn cold_start_with_no_snapshot_builds_from_base_storage_then_replays() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);
    fx.base_engine
        .put(encode_vector_id(1, 1), encode_vector_value(&[1.0, 0.0]));

    fx.controller.load_or_build(region(1)).await.unwrap();

    let handle = fx.registry.get(1).unwrap();
    assert_eq!(handle.status(), IndexStatus::Normal);
    assert!(handle.is_online());
    assert_eq!(handle.index().count(), 1);
}

#[tokio::test]
async fn cold_start_with_snapshot_restores_then_replays_tail() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);

    // First bring up the region so a snapshot can be taken of it.
    fx.controller.load_or_build(region(1)).await.unwrap();
    fx.controller
        .context()
        .registry
        .get(1)
        .unwrap()
        .upsert(&[VectorWithId::new(1, vec![1.0, 0.0])])
        .unwrap();
    fx.controller.save(1).await.unwrap();

    // Drop it from the registry to simulate a fresh process picking the
    // region back up from its snapshot.
    fx.registry.erase(1);

    let log = fx.cluster_engine.log_storage(1).unwrap();
    log.append(LogEntry {
        index: 1,
        requests: vec![LogRequest::VectorAdd(vec![VectorWithId::new(
            2,
            vec![0.0, 1.0],
        )])],
    });

    fx.controller.load_or_build(region(1)).await.unwrap();

    let handle = fx.registry.get(1).unwrap();
    assert_eq!(handle.index().count(), 2);
    assert_eq!(handle.apply_log_index(), 1);
}

#[tokio::test]
async fn rebuild_while_serving_swaps_in_a_caught_up_handle() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);
    fx.base_engine
        .put(encode_vector_id(1, 1), encode_vector_value(&[1.0, 0.0]));

    fx.controller.load_or_build(region(1)).await.unwrap();

    let log = fx.cluster_engine.log_storage(1).unwrap();
    log.append(LogEntry {
        index: 1,
        requests: vec![LogRequest::VectorAdd(vec![VectorWithId::new(
            2,
            vec![0.0, 1.0],
        )])],
    });

    fx.controller.rebuild(region(1), true, false).await.unwrap();

    let handle = fx.registry.get(1).unwrap();
    assert_eq!(handle.status(), IndexStatus::Normal);
    assert!(handle.is_online());
    assert_eq!(handle.apply_log_index(), 1);
    assert_eq!(handle.index().count(), 2);
}

#[tokio::test]
async fn rebuild_during_rebuild_is_rejected() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);
    fx.controller.load_or_build(region(1)).await.unwrap();

    assert!(fx.controller.check_and_set_rebuild_status(1, false).unwrap());
    // A second claim attempt while the first rebuild is still in flight
    // must fail.
    assert!(fx.controller.check_and_set_rebuild_status(1, false).is_err());
}

#[tokio::test]
async fn rebuild_recovers_a_handle_stuck_in_error() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);
    fx.controller.load_or_build(region(1)).await.unwrap();
    fx.registry.get(1).unwrap().set_status(IndexStatus::Error).unwrap();

    fx.controller.rebuild(region(1), false, false).await.unwrap();

    let handle = fx.registry.get(1).unwrap();
    assert_eq!(handle.status(), IndexStatus::Normal);
    assert!(handle.is_online());
}

#[tokio::test]
async fn rebuild_with_no_handle_and_initial_build_registers_a_fresh_one() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);
    fx.base_engine
        .put(encode_vector_id(1, 1), encode_vector_value(&[1.0, 0.0]));

    fx.controller.rebuild(region(1), false, true).await.unwrap();

    let handle = fx.registry.get(1).unwrap();
    assert_eq!(handle.status(), IndexStatus::Normal);
    assert_eq!(handle.index().count(), 1);
}

#[tokio::test]
async fn rebuild_with_no_handle_and_not_initial_build_is_a_caller_bug() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);

    let err = fx.controller.rebuild(region(1), false, false).await.unwrap_err();
    assert!(matches!(err, vim_core::ManagerError::Internal(_)));
}

#[tokio::test]
async fn delete_during_rebuild_causes_put_if_exists_to_fail() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);
    fx.controller.load_or_build(region(1)).await.unwrap();

    // Simulate the region having been deleted out from under the rebuild
    // right before the swap would happen, by erasing it from the registry
    // and then attempting a swap with a handle for the same id.
    fx.registry.erase(1);
    let factory = FlatIndexFactory;
    let index = factory.empty(&IndexParams {
        dimension: 2,
        extra: HashMap::new(),
    });
    let fresh = vim_manager::IndexHandle::new(1, index, 0, 0);
    assert!(!fx.registry.put_if_exists(1, fresh));
}

#[tokio::test]
async fn delete_vector_index_removes_registry_entry_and_snapshot() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);
    fx.controller.load_or_build(region(1)).await.unwrap();
    fx.controller.save(1).await.unwrap();

    fx.controller.delete_vector_index(1).await.unwrap();

    assert!(fx.registry.get(1).is_none());
    assert!(fx
        .controller
        .context()
        .snapshot_engine
        .last_snapshot_log_id(1)
        .unwrap()
        .is_none());
    assert!(fx
        .metadata_store
        .get(&vim_core::codec::gen_log_index_key(1))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn save_persists_metadata_record_matching_post_save_handle_state() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);
    fx.controller.load_or_build(region(1)).await.unwrap();
    fx.registry
        .get(1)
        .unwrap()
        .upsert(&[VectorWithId::new(1, vec![1.0, 0.0])])
        .unwrap();
    fx.registry.get(1).unwrap().set_apply_log_index(9);

    fx.controller.save(1).await.unwrap();

    let bytes = fx
        .metadata_store
        .get(&vim_core::codec::gen_log_index_key(1))
        .unwrap()
        .unwrap();
    let (snapshot_log_index, apply_log_index) =
        vim_core::codec::decode_vector_index_log_index(&bytes).unwrap();
    assert_eq!(snapshot_log_index, 9);
    assert_eq!(apply_log_index, 9);
    assert!(snapshot_log_index <= apply_log_index);
}

#[tokio::test]
async fn create_vector_index_registers_an_empty_online_handle() {
    let fx = fixture();
    fx.controller.create_vector_index(region(5)).await.unwrap();

    let handle = fx.registry.get(5).unwrap();
    assert_eq!(handle.status(), IndexStatus::Normal);
    assert!(handle.is_online());
    assert_eq!(handle.index().count(), 0);
}

#[tokio::test]
async fn scrub_saves_regions_that_have_drifted_past_their_save_lag_threshold() {
    let fx = fixture();
    fx.cluster_engine.register_region(1);

    let params = IndexParams {
        dimension: 2,
        extra: HashMap::from([("save_lag".to_string(), "1".to_string())]),
    };
    fx.controller
        .create_vector_index(Region::new(1, params.clone()))
        .await
        .unwrap();

    fx.registry
        .get(1)
        .unwrap()
        .upsert(&[VectorWithId::new(1, vec![1.0, 0.0])])
        .unwrap();
    fx.registry.get(1).unwrap().set_apply_log_index(5);

    fx.controller
        .scrub(vec![Region::new(1, params)])
        .await
        .unwrap();

    assert_eq!(
        fx.controller
            .context()
            .snapshot_engine
            .last_snapshot_log_id(1)
            .unwrap(),
        Some(5)
    );
}

#[tokio::test]
async fn save_succeeds_despite_follower_install_failure() {
    struct FailingInstallSnapshotEngine(FsSnapshotEngine);

    impl SnapshotEngine for FailingInstallSnapshotEngine {
        fn save(
            &self,
            region_id: u64,
            snapshot_log_index: u64,
            apply_log_index: u64,
            index: &dyn AnnIndex,
        ) -> ManagerResult<()> {
            self.0.save(region_id, snapshot_log_index, apply_log_index, index)
        }

        fn load(
            &self,
            region_id: u64,
            params: &IndexParams,
            index_factory: &dyn vim_core::index::IndexFactory,
        ) -> ManagerResult<Option<(Arc<dyn AnnIndex>, u64, u64)>> {
            self.0.load(region_id, params, index_factory)
        }

        fn last_snapshot_log_id(&self, region_id: u64) -> ManagerResult<Option<u64>> {
            self.0.last_snapshot_log_id(region_id)
        }

        fn delete(&self, region_id: u64) -> ManagerResult<()> {
            self.0.delete(region_id)
        }

        fn install_to_followers(&self, _region_id: u64) -> ManagerResult<()> {
            Err(ManagerError::Internal("follower unreachable".to_string()))
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(IndexRegistry::new());
    let base_engine = Arc::new(InMemoryBaseEngine::new());
    let metadata_store = Arc::new(InMemoryMetadataStore::new());
    let cluster_engine = Arc::new(InMemoryClusterEngine::new());
    cluster_engine.register_region(1);
    let snapshot_engine = Arc::new(FailingInstallSnapshotEngine(FsSnapshotEngine::new(tmp.path())));
    let index_factory = Arc::new(FlatIndexFactory);

    let ctx = Context::new(
        tmp.path().to_path_buf(),
        registry.clone(),
        base_engine,
        metadata_store.clone(),
        cluster_engine,
        snapshot_engine,
        index_factory,
    );
    let controller = LifecycleController::new(Arc::new(ctx));

    controller.load_or_build(region(1)).await.unwrap();

    // The local snapshot and metadata record commit even though the
    // follower-install leg always fails; `save` must still report success.
    controller.save(1).await.unwrap();

    let handle = registry.get(1).unwrap();
    assert_eq!(handle.status(), IndexStatus::Normal);
    assert!(metadata_store
        .get(&vim_core::codec::gen_log_index_key(1))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn load_or_build_failure_restores_existing_handle_to_normal() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(IndexRegistry::new());
    let base_engine = Arc::new(InMemoryBaseEngine::new());
    let metadata_store = Arc::new(InMemoryMetadataStore::new());
    let cluster_engine = Arc::new(InMemoryClusterEngine::new());
    cluster_engine.register_region(1);
    let snapshot_engine = Arc::new(FsSnapshotEngine::new(tmp.path()));
    let index_factory = Arc::new(FlatIndexFactory);

    let ctx = Context::new(
        tmp.path().to_path_buf(),
        registry.clone(),
        base_engine,
        metadata_store,
        cluster_engine,
        snapshot_engine,
        index_factory,
    );
    let controller = LifecycleController::new(Arc::new(ctx));

    // Bring the region up successfully first so there is an existing,
    // `NORMAL` handle to restore.
    controller.load_or_build(region(1)).await.unwrap();
    assert_eq!(registry.get(1).unwrap().status(), IndexStatus::Normal);

    // Swap in a base engine that always fails the scan, forcing the next
    // reload attempt (no snapshot on disk, so it falls to the Builder) to
    // fail.
    let failing_ctx = Context::new(
        tmp.path().to_path_buf(),
        registry.clone(),
        Arc::new(FailingBaseEngine),
        Arc::new(InMemoryMetadataStore::new()),
        controller.context().cluster_engine.clone(),
        controller.context().snapshot_engine.clone(),
        controller.context().index_factory.clone(),
    );
    let failing_controller = LifecycleController::new(Arc::new(failing_ctx));

    let err = failing_controller.load_or_build(region(1)).await.unwrap_err();
    assert!(matches!(err, ManagerError::Internal(_)));

    // The unsuccessful reload must not leave the region permanently
    // disabled: the pre-existing handle is restored to NORMAL rather than
    // left stuck in LOADING.
    let handle = registry.get(1).unwrap();
    assert_eq!(handle.status(), IndexStatus::Normal);
}

#[tokio::test]
async fn rebuild_aborts_and_restores_old_handle_when_save_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(IndexRegistry::new());
    let base_engine = Arc::new(InMemoryBaseEngine::new());
    let metadata_store = Arc::new(InMemoryMetadataStore::new());
    let cluster_engine = Arc::new(InMemoryClusterEngine::new());
    cluster_engine.register_region(1);
    let snapshot_engine = Arc::new(FailingSaveSnapshotEngine);
    let index_factory = Arc::new(FlatIndexFactory);

    let ctx = Context::new(
        tmp.path().to_path_buf(),
        registry.clone(),
        base_engine,
        metadata_store,
        cluster_engine,
        snapshot_engine,
        index_factory,
    );
    let controller = LifecycleController::new(Arc::new(ctx));

    controller.create_vector_index(region(1)).await.unwrap();
    assert_eq!(registry.get(1).unwrap().status(), IndexStatus::Normal);

    let err = controller
        .rebuild(region(1), true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Internal(_)));

    // The rebuild must abort rather than silently continue past the save
    // failure, and the old handle must be left serving in NORMAL rather
    // than stuck in REBUILDING.
    let handle = registry.get(1).unwrap();
    assert_eq!(handle.status(), IndexStatus::Normal);
    assert!(handle.is_online());
}
