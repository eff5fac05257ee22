#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod builder;
pub mod handle;
pub mod lifecycle;
pub mod registry;
pub mod replay;
pub mod snapshot;

pub use builder::{build_vector_index, load_region_log_index, persist_region_log_index};
pub use handle::IndexHandle;
pub use lifecycle::{Context, LifecycleController};
pub use registry::IndexRegistry;
pub use replay::{replay_wal_to_vector_index, DEFAULT_BATCH_SIZE};
pub use snapshot::{FsSnapshotEngine, SnapshotEngine};
