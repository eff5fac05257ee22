//! Replays committed log entries into a region's index, bringing it up to
//! date with everything the replicated log has accepted since its last
//! known `apply_log_index`.
//!
//! Adds are buffered and flushed in batches; deletes always flush the
//! pending batch first ("flush-before-delete") so an ADD and a later
//! DELETE of the same vector_id in the same replay window are applied in
//! log order rather than racing inside the index.

use vim_core::{ManagerError, ManagerResult};
use vim_store::{ClusterEngine, LogRequest};

use crate::handle::IndexHandle;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Replays entries with `start <= log_id <= end` from region `region_id`'s
/// log into `handle`'s index, updating `handle`'s `apply_log_index` as it
/// goes. Does not touch `online`/`status` — callers decide when the handle
/// is safe to serve from.
pub fn replay_wal_to_vector_index(
    handle: &IndexHandle,
    region_id: u64,
    start: u64,
    end: u64,
    cluster_engine: &dyn ClusterEngine,
    batch_size: usize,
) -> ManagerResult<()> {
    if !cluster_engine.is_replicated() {
        return Err(ManagerError::Internal(format!(
            "cluster engine for region {region_id} is not a replicated engine"
        )));
    }
    if !cluster_engine.has_node(region_id) {
        return Err(ManagerError::RaftNotFound(region_id));
    }
    let log = cluster_engine
        .log_storage(region_id)
        .ok_or(ManagerError::RaftNotFound(region_id))?;

    let entries = log.get_entries(start, end)?;

    let mut pending = Vec::with_capacity(batch_size.min(4096));
    let mut last_log_id = None;

    let flush = |pending: &mut Vec<vim_core::VectorWithId>| -> ManagerResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        handle.index().upsert(pending)?;
        pending.clear();
        Ok(())
    };

    for entry in entries {
        for request in entry.requests {
            match request {
                LogRequest::VectorAdd(vectors) => {
                    pending.extend(vectors);
                    if pending.len() >= batch_size {
                        flush(&mut pending)?;
                    }
                }
                LogRequest::VectorDelete(ids) => {
                    flush(&mut pending)?;
                    handle.index().delete(&ids)?;
                }
                LogRequest::Other => {}
            }
        }
        last_log_id = Some(entry.index);
    }

    flush(&mut pending)?;

    if let Some(last) = last_log_id {
        handle.set_apply_log_index(last);
    }

    Ok(())
}
