//! Persists and restores an index's on-disk snapshot.
//!
//! A snapshot file is a 16-byte header — `encode_vector_index_log_index`
//! applied to `(snapshot_log_index, apply_log_index)` at save time — followed
//! by the algorithm's own opaque state bytes from `AnnIndex::save_state`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vim_core::codec::{decode_vector_index_log_index, encode_vector_index_log_index};
use vim_core::index::{AnnIndex, IndexFactory};
use vim_core::{IndexParams, ManagerError, ManagerResult};

pub trait SnapshotEngine: Send + Sync {
    fn save(
        &self,
        region_id: u64,
        snapshot_log_index: u64,
        apply_log_index: u64,
        index: &dyn AnnIndex,
    ) -> ManagerResult<()>;

    /// Loads a region's snapshot, if one exists, returning the restored
    /// index alongside the `(snapshot_log_index, apply_log_index)` recorded
    /// when it was saved.
    fn load(
        &self,
        region_id: u64,
        params: &IndexParams,
        index_factory: &dyn IndexFactory,
    ) -> ManagerResult<Option<(Arc<dyn AnnIndex>, u64, u64)>>;

    fn last_snapshot_log_id(&self, region_id: u64) -> ManagerResult<Option<u64>>;

    /// Removes a region's on-disk snapshot state entirely, used when the
    /// region itself is deleted.
    fn delete(&self, region_id: u64) -> ManagerResult<()>;

    /// Pushes the latest snapshot to follower replicas. A single-node or
    /// test deployment has no followers to push to, so the default is a
    /// no-op; a clustered deployment would replace this with an actual
    /// transfer over the replication transport.
    fn install_to_followers(&self, _region_id: u64) -> ManagerResult<()> {
        Ok(())
    }
}

/// Filesystem-backed snapshot engine: one file per region under
/// `<base_dir>/<region_id>/snapshot.bin`.
pub struct FsSnapshotEngine {
    base_dir: PathBuf,
}

impl FsSnapshotEngine {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn region_dir(&self, region_id: u64) -> PathBuf {
        self.base_dir.join(region_id.to_string())
    }

    fn snapshot_path(&self, region_id: u64) -> PathBuf {
        self.region_dir(region_id).join("snapshot.bin")
    }

    fn read_header(path: &Path) -> ManagerResult<Option<(u64, u64)>> {
        match fs::read(path) {
            Ok(bytes) => {
                if bytes.len() < 16 {
                    return Err(ManagerError::Codec(
                        "snapshot file shorter than its header".to_string(),
                    ));
                }
                Ok(Some(decode_vector_index_log_index(&bytes[..16])?))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ManagerError::Io(e)),
        }
    }
}

impl SnapshotEngine for FsSnapshotEngine {
    fn save(
        &self,
        region_id: u64,
        snapshot_log_index: u64,
        apply_log_index: u64,
        index: &dyn AnnIndex,
    ) -> ManagerResult<()> {
        let dir = self.region_dir(region_id);
        fs::create_dir_all(&dir)?;

        let mut bytes = encode_vector_index_log_index(snapshot_log_index, apply_log_index);
        bytes.extend(index.save_state()?);

        let tmp_path = dir.join("snapshot.bin.tmp");
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, self.snapshot_path(region_id))?;

        tracing::info!(region_id, snapshot_log_index, apply_log_index, "saved snapshot");
        Ok(())
    }

    fn load(
        &self,
        region_id: u64,
        params: &IndexParams,
        index_factory: &dyn IndexFactory,
    ) -> ManagerResult<Option<(Arc<dyn AnnIndex>, u64, u64)>> {
        let path = self.snapshot_path(region_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ManagerError::Io(e)),
        };
        if bytes.len() < 16 {
            return Err(ManagerError::Codec(
                "snapshot file shorter than its header".to_string(),
            ));
        }
        let (snapshot_log_index, apply_log_index) = decode_vector_index_log_index(&bytes[..16])?;
        let index = index_factory.load(params, &bytes[16..])?;
        Ok(Some((index, snapshot_log_index, apply_log_index)))
    }

    fn last_snapshot_log_id(&self, region_id: u64) -> ManagerResult<Option<u64>> {
        Ok(Self::read_header(&self.snapshot_path(region_id))?.map(|(snap, _)| snap))
    }

    fn delete(&self, region_id: u64) -> ManagerResult<()> {
        match fs::remove_dir_all(self.region_dir(region_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ManagerError::Io(e)),
        }
    }
}
