//! The WAL / consensus log: consumed only as `get_entries(start, end)`
//! returning ordered, committed mutation records, behind a node/engine
//! lookup that preflights replay the way a replicated log client must.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use vim_core::ManagerResult;
use vim_core::VectorWithId;

/// One mutation request inside a log entry. Unknown/irrelevant request
/// kinds are represented by `Other` and silently ignored by the replayer.
#[derive(Debug, Clone)]
pub enum LogRequest {
    VectorAdd(Vec<VectorWithId>),
    VectorDelete(Vec<u64>),
    Other,
}

/// A single WAL entry: a monotonically increasing `index` plus the ordered
/// requests it carries.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub index: u64,
    pub requests: Vec<LogRequest>,
}

/// Ordered, committed log entries for one region.
pub trait LogStorage: Send + Sync {
    /// Returns entries with `start <= log_id <= end`, ascending by
    /// `log_id`. `end == u64::MAX` means "through the latest committed
    /// entry".
    fn get_entries(&self, start: u64, end: u64) -> ManagerResult<Vec<LogEntry>>;
}

/// The replicated engine that owns region-to-raft-node and
/// region-to-log-storage lookups. WAL replay consults this before touching
/// the log: an engine that isn't replicated is an internal error, and a
/// region with no raft node is reported distinctly so callers can retry
/// later instead of treating it as permanent.
pub trait ClusterEngine: Send + Sync {
    fn is_replicated(&self) -> bool;
    fn has_node(&self, region_id: u64) -> bool;
    fn log_storage(&self, region_id: u64) -> Option<Arc<dyn LogStorage>>;
}

/// In-memory reference log storage, append-only by construction (entries
/// are inserted once and never mutated in these tests).
#[derive(Debug, Default)]
pub struct InMemoryLogStorage {
    entries: RwLock<BTreeMap<u64, LogEntry>>,
}

impl InMemoryLogStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: LogEntry) {
        self.entries.write().insert(entry.index, entry);
    }
}

impl LogStorage for InMemoryLogStorage {
    fn get_entries(&self, start: u64, end: u64) -> ManagerResult<Vec<LogEntry>> {
        let entries = self.entries.read();
        Ok(entries.range(start..=end).map(|(_, e)| e.clone()).collect())
    }
}

/// In-memory reference cluster engine: every region it's told about has a
/// node and a log storage; regions it's never seen report `ERAFT_NOT_FOUND`.
#[derive(Debug, Default)]
pub struct InMemoryClusterEngine {
    replicated: bool,
    logs: RwLock<std::collections::HashMap<u64, Arc<InMemoryLogStorage>>>,
}

impl InMemoryClusterEngine {
    pub fn new() -> Self {
        Self {
            replicated: true,
            logs: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn non_replicated() -> Self {
        Self {
            replicated: false,
            logs: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn register_region(&self, region_id: u64) -> Arc<InMemoryLogStorage> {
        let log = Arc::new(InMemoryLogStorage::new());
        self.logs.write().insert(region_id, log.clone());
        log
    }
}

impl ClusterEngine for InMemoryClusterEngine {
    fn is_replicated(&self) -> bool {
        self.replicated
    }

    fn has_node(&self, region_id: u64) -> bool {
        self.logs.read().contains_key(&region_id)
    }

    fn log_storage(&self, region_id: u64) -> Option<Arc<dyn LogStorage>> {
        self.logs
            .read()
            .get(&region_id)
            .cloned()
            .map(|l| l as Arc<dyn LogStorage>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_entries_is_ordered_and_bounded() {
        let log = InMemoryLogStorage::new();
        for i in [3u64, 1, 2] {
            log.append(LogEntry {
                index: i,
                requests: vec![],
            });
        }

        let entries = log.get_entries(1, 2).unwrap();
        assert_eq!(entries.iter().map(|e| e.index).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn cluster_engine_reports_missing_node() {
        let engine = InMemoryClusterEngine::new();
        assert!(engine.is_replicated());
        assert!(!engine.has_node(7));
        engine.register_region(7);
        assert!(engine.has_node(7));
    }
}
