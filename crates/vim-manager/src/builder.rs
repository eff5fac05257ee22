//! Builds a fresh in-memory index for a region directly from base storage,
//! the first step of both cold start (no usable snapshot) and a full
//! rebuild.

use std::sync::Arc;

use vim_core::codec::{decode_vector_value, gen_log_index_key, vector_scan_bounds};
use vim_core::index::IndexFactory;
use vim_core::{ManagerResult, Region, VectorWithId};
use vim_store::{BaseEngine, MetadataStore};

use crate::handle::IndexHandle;

/// The `(snapshot_log_index, apply_log_index)` a region's metadata record
/// carries into a fresh build. Absent metadata means "never snapshotted,
/// never applied" — `(0, 0)`, so replay starts from the beginning of the
/// log.
pub fn load_region_log_index(
    metadata_store: &dyn MetadataStore,
    region_id: u64,
) -> ManagerResult<(u64, u64)> {
    let key = gen_log_index_key(region_id);
    match metadata_store.get(&key)? {
        Some(bytes) => vim_core::codec::decode_vector_index_log_index(&bytes),
        None => Ok((0, 0)),
    }
}

/// Persists `(snapshot_log_index, apply_log_index)` for `region_id`. Called
/// whenever either value advances, per the data model's metadata-record
/// contract — most notably right after a successful snapshot save.
pub fn persist_region_log_index(
    metadata_store: &dyn MetadataStore,
    region_id: u64,
    snapshot_log_index: u64,
    apply_log_index: u64,
) -> ManagerResult<()> {
    let key = gen_log_index_key(region_id);
    let value =
        vim_core::codec::encode_vector_index_log_index(snapshot_log_index, apply_log_index);
    metadata_store.put(&key, &value)
}

/// Scans every vector currently in base storage for `region` and upserts it
/// into a fresh, empty index. A record that fails to decode (truncated,
/// empty, dimension mismatch at upsert time) is skipped with a warning
/// rather than aborting the whole build — base storage can briefly contain
/// write garbage from a concurrently failing request.
pub fn build_vector_index(
    region: &Region,
    base_engine: &dyn BaseEngine,
    metadata_store: &dyn MetadataStore,
    index_factory: &dyn IndexFactory,
) -> ManagerResult<Arc<IndexHandle>> {
    let (snapshot_log_index, apply_log_index) =
        load_region_log_index(metadata_store, region.id)?;

    let index = index_factory.empty(&region.index_params);

    let (lower, upper) = vector_scan_bounds(region.id);
    let rows = base_engine.scan(&lower, &upper)?;

    let mut batch = Vec::with_capacity(rows.len());
    for (key, value) in rows {
        let vector_id = match vim_core::codec::decode_vector_id(&key) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(region_id = region.id, error = %e, "skipping base record with malformed key");
                continue;
            }
        };
        match decode_vector_value(&value) {
            Ok(values) => batch.push(VectorWithId::new(vector_id, values)),
            Err(e) => {
                tracing::warn!(region_id = region.id, vector_id, error = %e, "skipping malformed base record");
            }
        }
    }

    if !batch.is_empty() {
        index.upsert(&batch)?;
    }

    tracing::info!(
        region_id = region.id,
        vectors = batch.len(),
        apply_log_index,
        "built vector index from base storage"
    );

    Ok(IndexHandle::new(
        region.id,
        index,
        apply_log_index,
        snapshot_log_index,
    ))
}
