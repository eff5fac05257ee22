//! Ties the registry, builder, replayer, and snapshot engine together into
//! the operations the rest of the store actually calls: bring a region's
//! index up at startup, rebuild it while it keeps serving, save and scrub
//! it periodically, and tear it down when the region goes away.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vim_core::index::IndexFactory;
use vim_core::status::IndexStatus;
use vim_core::{ManagerError, ManagerResult, Region};
use vim_store::{BaseEngine, ClusterEngine, MetadataStore};

use crate::builder::{build_vector_index, persist_region_log_index};
use crate::handle::IndexHandle;
use crate::registry::IndexRegistry;
use crate::replay::{replay_wal_to_vector_index, DEFAULT_BATCH_SIZE};
use crate::snapshot::SnapshotEngine;

const DEFAULT_SCRUB_INTERVAL_SECS: u64 = 300;

/// Everything a region's lifecycle operations need, gathered in one place
/// instead of threaded through every function call or reached for via a
/// process-global.
pub struct Context {
    pub index_path: PathBuf,
    pub registry: Arc<IndexRegistry>,
    pub base_engine: Arc<dyn BaseEngine>,
    pub metadata_store: Arc<dyn MetadataStore>,
    pub cluster_engine: Arc<dyn ClusterEngine>,
    pub snapshot_engine: Arc<dyn SnapshotEngine>,
    pub index_factory: Arc<dyn IndexFactory>,
    pub batch_size: usize,
    pub scrub_interval: Duration,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index_path: PathBuf,
        registry: Arc<IndexRegistry>,
        base_engine: Arc<dyn BaseEngine>,
        metadata_store: Arc<dyn MetadataStore>,
        cluster_engine: Arc<dyn ClusterEngine>,
        snapshot_engine: Arc<dyn SnapshotEngine>,
        index_factory: Arc<dyn IndexFactory>,
    ) -> Self {
        Self {
            index_path,
            registry,
            base_engine,
            metadata_store,
            cluster_engine,
            snapshot_engine,
            index_factory,
            batch_size: batch_size_from_env(),
            scrub_interval: scrub_interval_from_env(),
        }
    }
}

fn batch_size_from_env() -> usize {
    std::env::var("VIM_REPLAY_BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_BATCH_SIZE)
}

fn scrub_interval_from_env() -> Duration {
    let secs = std::env::var("VIM_SCRUB_INTERVAL_SEC")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SCRUB_INTERVAL_SECS);
    Duration::from_secs(secs)
}

/// The lifecycle controller. Cheap to clone: it's just an `Arc<Context>`
/// handle, so background tasks (the scrub loop) can hold their own copy.
#[derive(Clone)]
pub struct LifecycleController {
    ctx: Arc<Context>,
}

impl LifecycleController {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Brings up every region in `regions` that the registry doesn't
    /// already have a handle for. Safe to call more than once: regions
    /// already present are left untouched rather than re-loaded.
    pub async fn init(&self, regions: Vec<Region>) -> ManagerResult<()> {
        let this = self.clone();
        run_blocking(move || this.init_sync(&regions)).await
    }

    fn init_sync(&self, regions: &[Region]) -> ManagerResult<()> {
        for region in regions {
            if self.ctx.registry.contains(region.id) {
                tracing::debug!(region_id = region.id, "skipping already-loaded region");
                continue;
            }
            self.load_or_build_sync(region)?;
        }
        Ok(())
    }

    /// Loads a region's index from its latest snapshot if one exists,
    /// otherwise builds it fresh from base storage, then replays the log
    /// tail and brings the handle online.
    pub async fn load_or_build(&self, region: Region) -> ManagerResult<()> {
        let this = self.clone();
        run_blocking(move || this.load_or_build_sync(&region)).await
    }

    fn load_or_build_sync(&self, region: &Region) -> ManagerResult<()> {
        // Whatever is currently registered for this region (if anything)
        // goes to LOADING for the duration of the reload. An unsuccessful
        // attempt must not permanently disable the region, so every failure
        // path below restores it to NORMAL before propagating the error.
        let old = self.ctx.registry.get(region.id);
        if let Some(old) = &old {
            old.set_status(IndexStatus::Loading)?;
        }
        let restore_old_on_failure = |err: ManagerError| -> ManagerError {
            if let Some(old) = &old {
                let _ = old.set_status(IndexStatus::Normal);
            }
            err
        };

        let loaded = self
            .ctx
            .snapshot_engine
            .load(region.id, &region.index_params, self.ctx.index_factory.as_ref())
            .map_err(restore_old_on_failure)?;

        let handle = match loaded {
            Some((index, snapshot_log_index, apply_log_index)) => {
                tracing::info!(region_id = region.id, snapshot_log_index, "loaded snapshot");
                IndexHandle::new(region.id, index, apply_log_index, snapshot_log_index)
            }
            None => build_vector_index(
                region,
                self.ctx.base_engine.as_ref(),
                self.ctx.metadata_store.as_ref(),
                self.ctx.index_factory.as_ref(),
            )
            .map_err(restore_old_on_failure)?,
        };

        replay_wal_to_vector_index(
            &handle,
            region.id,
            handle.apply_log_index().saturating_add(1),
            u64::MAX,
            self.ctx.cluster_engine.as_ref(),
            self.ctx.batch_size,
        )
        .map_err(restore_old_on_failure)?;

        handle.set_status(IndexStatus::Normal)?;
        handle.set_online(true);
        self.ctx.registry.put(region.id, handle);
        Ok(())
    }

    /// Atomically claims the right to rebuild a region: only one rebuild
    /// (and no concurrent snapshot) may run at a time. `is_initial_build`
    /// covers the case where a region is being built for the very first
    /// time through the rebuild path rather than `load_or_build` — no
    /// handle may exist yet, and that's not an error.
    ///
    /// Returns `Ok(true)` if the claim succeeded — either an existing
    /// handle is now `REBUILDING`, or there was no handle at all and
    /// `is_initial_build` says that's expected — `Ok(false)` if an existing
    /// handle is offline (mid handover; the caller should skip this round
    /// rather than fail), and `Err` if a handle exists but is in a status
    /// that forbids rebuilding (`LOADING`/`REBUILDING`/`SNAPSHOTTING`), or no
    /// handle exists and this isn't an initial build (caller bug).
    pub fn check_and_set_rebuild_status(
        &self,
        region_id: u64,
        is_initial_build: bool,
    ) -> ManagerResult<bool> {
        let handle = match self.ctx.registry.get(region_id) {
            Some(h) => h,
            None if is_initial_build => return Ok(true),
            None => {
                return Err(ManagerError::Internal(format!(
                    "region {region_id} has no index and this is not an initial build"
                )))
            }
        };

        if !handle.is_online() {
            return Ok(false);
        }

        let current = handle.status();
        if !matches!(
            current,
            IndexStatus::Normal | IndexStatus::Error | IndexStatus::None
        ) {
            return Err(ManagerError::Internal(format!(
                "region {region_id} cannot be rebuilt while status is {current:?}"
            )));
        }

        if !handle.try_set_status(current, IndexStatus::Rebuilding) {
            return Err(ManagerError::Internal(format!(
                "region {region_id} rebuild status changed concurrently"
            )));
        }

        // Re-read and verify the transition actually stuck; a concurrent
        // delete-then-recreate between the two calls above would otherwise
        // go unnoticed.
        match self.ctx.registry.get(region_id) {
            Some(h) if h.status() == IndexStatus::Rebuilding => Ok(true),
            _ => Err(ManagerError::Internal(format!(
                "region {region_id} handle changed while claiming rebuild status"
            ))),
        }
    }

    /// Rebuilds a region's index while it keeps serving: build fresh from
    /// base storage, optionally snapshot that fresh state (`need_save`),
    /// replay the log tail twice (a non-blocking first pass while the old
    /// handle still serves, then a short write-freeze second pass to catch
    /// the remainder), and swap the new handle in atomically.
    pub async fn rebuild(
        &self,
        region: Region,
        need_save: bool,
        is_initial_build: bool,
    ) -> ManagerResult<()> {
        let this = self.clone();
        run_blocking(move || this.rebuild_sync(&region, need_save, is_initial_build)).await
    }

    fn rebuild_sync(&self, region: &Region, need_save: bool, is_initial_build: bool) -> ManagerResult<()> {
        if !self.check_and_set_rebuild_status(region.id, is_initial_build)? {
            // The existing handle is offline (mid handover already); this
            // round of rebuild is a no-op, not a failure.
            tracing::debug!(region_id = region.id, "rebuild skipped, handle is offline");
            return Ok(());
        }
        // `None` only for a genuine initial build with no prior handle;
        // every other path is guaranteed a handle by the check above.
        let old = self.ctx.registry.get(region.id);

        let new_handle = match build_vector_index(
            region,
            self.ctx.base_engine.as_ref(),
            self.ctx.metadata_store.as_ref(),
            self.ctx.index_factory.as_ref(),
        ) {
            Ok(h) => h,
            Err(e) => {
                if let Some(old) = &old {
                    let _ = old.set_status(IndexStatus::Normal);
                }
                return Err(e);
            }
        };

        if need_save {
            if let Err(e) = self.ctx.snapshot_engine.save(
                region.id,
                new_handle.apply_log_index(),
                new_handle.apply_log_index(),
                new_handle.index().as_ref(),
            ) {
                tracing::warn!(region_id = region.id, error = %e, "snapshot of freshly built index failed, aborting rebuild");
                if let Some(old) = &old {
                    let _ = old.set_status(IndexStatus::Normal);
                }
                return Err(ManagerError::Internal(format!(
                    "save vector index failed for region {}: {e}",
                    region.id
                )));
            }
            new_handle.set_snapshot_log_index(new_handle.apply_log_index());
            if let Err(e) = persist_region_log_index(
                self.ctx.metadata_store.as_ref(),
                region.id,
                new_handle.apply_log_index(),
                new_handle.apply_log_index(),
            ) {
                tracing::warn!(region_id = region.id, error = %e, "failed to persist metadata after rebuild snapshot");
            }
        }

        // First pass: non-blocking, old handle still online and serving.
        if let Err(e) = replay_wal_to_vector_index(
            &new_handle,
            region.id,
            new_handle.apply_log_index().saturating_add(1),
            u64::MAX,
            self.ctx.cluster_engine.as_ref(),
            self.ctx.batch_size,
        ) {
            if let Some(old) = &old {
                let _ = old.set_status(IndexStatus::Normal);
            }
            return Err(e);
        }

        // Write-freeze window: stop serving the old handle so the tail
        // catch-up below sees a log range nothing else can fall further
        // behind in.
        if let Some(old) = &old {
            old.set_online(false);
        }

        let second_pass = replay_wal_to_vector_index(
            &new_handle,
            region.id,
            new_handle.apply_log_index().saturating_add(1),
            u64::MAX,
            self.ctx.cluster_engine.as_ref(),
            self.ctx.batch_size,
        );
        if let Err(e) = second_pass {
            if let Some(old) = &old {
                let _ = old.set_status(IndexStatus::Error);
                old.set_online(true);
            }
            return Err(e);
        }

        new_handle.set_status(IndexStatus::Normal)?;
        new_handle.set_online(true);

        let installed = if old.is_some() {
            self.ctx.registry.put_if_exists(region.id, new_handle.clone())
        } else {
            self.ctx.registry.put(region.id, new_handle.clone());
            true
        };
        if !installed {
            new_handle.set_online(false);
            return Err(ManagerError::Internal(format!(
                "region {} was deleted during rebuild",
                region.id
            )));
        }

        tracing::info!(region_id = region.id, "rebuild complete");
        Ok(())
    }

    /// Persists a region's current in-memory state to its snapshot engine.
    pub async fn save(&self, region_id: u64) -> ManagerResult<()> {
        let this = self.clone();
        run_blocking(move || this.save_sync(region_id)).await
    }

    fn save_sync(&self, region_id: u64) -> ManagerResult<()> {
        let handle = self
            .ctx
            .registry
            .get(region_id)
            .ok_or_else(|| ManagerError::Internal(format!("region {region_id} has no index")))?;

        if !handle.try_set_status(IndexStatus::Normal, IndexStatus::Snapshotting) {
            return Err(ManagerError::Internal(format!(
                "region {region_id} already has a rebuild or snapshot in progress"
            )));
        }

        let apply_log_index = handle.apply_log_index();
        let result = self.ctx.snapshot_engine.save(
            region_id,
            apply_log_index,
            apply_log_index,
            handle.index().as_ref(),
        );

        let _ = handle.set_status(IndexStatus::Normal);

        result?;
        handle.set_snapshot_log_index(apply_log_index);
        persist_region_log_index(
            self.ctx.metadata_store.as_ref(),
            region_id,
            apply_log_index,
            apply_log_index,
        )?;

        // The local snapshot and metadata record are already committed at
        // this point; a follower-install failure must not surface as a
        // failed save.
        if let Err(e) = self.ctx.snapshot_engine.install_to_followers(region_id) {
            tracing::warn!(region_id, error = %e, "snapshot install to followers failed");
        }
        Ok(())
    }

    /// Sweeps every registered, healthy region and triggers a save and/or
    /// rebuild where the algorithm's own policy hooks say it's warranted.
    /// Regions are scrubbed one at a time: a rebuild already pins the only
    /// CPU-heavy background slot this subsystem reserves for itself, so
    /// overlapping scrubs would just contend for it.
    pub async fn scrub(&self, regions: Vec<Region>) -> ManagerResult<()> {
        let this = self.clone();
        run_blocking(move || this.scrub_sync(&regions)).await
    }

    fn scrub_sync(&self, regions: &[Region]) -> ManagerResult<()> {
        for region in regions {
            let Some(handle) = self.ctx.registry.get(region.id) else {
                continue;
            };
            if handle.status() != IndexStatus::Normal || !handle.is_online() {
                continue;
            }

            let lag = handle
                .apply_log_index()
                .saturating_sub(handle.snapshot_log_index());

            if handle.index().need_rebuild(lag) {
                tracing::info!(region_id = region.id, lag, "scrub triggering rebuild");
                if let Err(e) = self.rebuild_sync(region, true, false) {
                    tracing::warn!(region_id = region.id, error = %e, "scrub rebuild failed");
                }
            } else if handle.index().need_save(lag) {
                tracing::info!(region_id = region.id, lag, "scrub triggering save");
                if let Err(e) = self.save_sync(region.id) {
                    tracing::warn!(region_id = region.id, error = %e, "scrub save failed");
                }
            }
        }
        Ok(())
    }

    /// Spawns a background task that calls `scrub` on `self.ctx.scrub_interval`
    /// until `regions` changes are picked up by the caller re-spawning it.
    /// Returns the `JoinHandle` so the caller can cancel it on shutdown.
    pub fn spawn_scrub_loop(&self, regions: Vec<Region>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let interval = self.ctx.scrub_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = this.scrub(regions.clone()).await {
                    tracing::warn!(error = %e, "periodic scrub pass failed");
                }
            }
        })
    }

    /// Registers a brand-new region with an empty index, with no base
    /// storage to scan and no log tail to replay.
    pub async fn create_vector_index(&self, region: Region) -> ManagerResult<()> {
        let this = self.clone();
        run_blocking(move || this.create_vector_index_sync(&region)).await
    }

    fn create_vector_index_sync(&self, region: &Region) -> ManagerResult<()> {
        if self.ctx.registry.contains(region.id) {
            return Err(ManagerError::Internal(format!(
                "region {} already has an index",
                region.id
            )));
        }
        let index = self.ctx.index_factory.empty(&region.index_params);
        let handle = IndexHandle::new(region.id, index, 0, 0);
        handle.set_status(IndexStatus::Normal)?;
        handle.set_online(true);
        self.ctx.registry.put(region.id, handle);
        Ok(())
    }

    /// Direct registry read-through for a single region.
    pub fn get_vector_index(&self, region_id: u64) -> Option<Arc<IndexHandle>> {
        self.ctx.registry.get(region_id)
    }

    /// Direct registry read-through for every currently registered region.
    pub fn get_all_vector_index(&self) -> Vec<Arc<IndexHandle>> {
        self.ctx.registry.all_values()
    }

    /// Removes a region's index from the registry, deletes its on-disk
    /// snapshot state, and clears its metadata record. Idempotent: deleting
    /// an already-absent region succeeds.
    pub async fn delete_vector_index(&self, region_id: u64) -> ManagerResult<()> {
        let this = self.clone();
        run_blocking(move || this.delete_vector_index_sync(region_id)).await
    }

    fn delete_vector_index_sync(&self, region_id: u64) -> ManagerResult<()> {
        if let Some(handle) = self.ctx.registry.erase(region_id) {
            handle.set_online(false);
        }
        self.ctx
            .metadata_store
            .delete(&vim_core::codec::gen_log_index_key(region_id))?;
        self.ctx.snapshot_engine.delete(region_id)
    }
}

async fn run_blocking<F>(f: F) -> ManagerResult<()>
where
    F: FnOnce() -> ManagerResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ManagerError::Internal(format!("lifecycle task panicked: {e}")))?
}
