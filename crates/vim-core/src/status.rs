//! The per-index status enum and its legal transitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexStatus {
    None,
    Loading,
    Normal,
    Rebuilding,
    Snapshotting,
    Error,
}

/// Legal transition table:
///
/// ```text
/// NONE ─► LOADING ─► NORMAL ─► REBUILDING ─► NORMAL
///                        ├──► SNAPSHOTTING ─► NORMAL
///                        └──► ERROR ─► REBUILDING ─► NORMAL
/// ```
///
/// `Normal` is the only state with more than one legal successor, and a
/// status is always allowed to re-set itself to its current value (callers
/// like `check_and_set_rebuild_status` re-read and re-verify transitions
/// rather than assume idempotence, but some reset paths do set `Normal ->
/// Normal`).
///
/// `None -> Rebuilding` is also legal: an initial build driven through the
/// rebuild path (rather than `load_or_build`) starts from no handle at all.
///
/// `Normal -> Loading` and `Error -> Loading` are legal too: `load_or_build`
/// re-entering against a region that already has a handle (e.g. a retry
/// after a prior load attempt left it `NORMAL`, or recovery of a handle
/// stuck in `ERROR`) marks that existing handle `LOADING` for the duration
/// of the reload, per spec.md §4.7.1 step 1.
pub fn transition_allowed(from: IndexStatus, to: IndexStatus) -> bool {
    use IndexStatus::{Error, Loading, None as NoneStatus, Normal, Rebuilding, Snapshotting};

    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (NoneStatus, Loading)
            | (NoneStatus, Rebuilding)
            | (Loading, Normal)
            | (Loading, NoneStatus)
            | (Normal, Loading)
            | (Normal, Rebuilding)
            | (Normal, Snapshotting)
            | (Normal, Error)
            | (Rebuilding, Normal)
            | (Rebuilding, Error)
            | (Snapshotting, Normal)
            | (Error, Loading)
            | (Error, Rebuilding)
    )
}
