#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod base_engine;
pub mod log_storage;
pub mod metadata;

pub use base_engine::{BaseEngine, InMemoryBaseEngine};
pub use log_storage::{
    ClusterEngine, InMemoryClusterEngine, InMemoryLogStorage, LogEntry, LogRequest, LogStorage,
};
pub use metadata::{InMemoryMetadataStore, MetadataStore};
