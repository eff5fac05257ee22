#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

//! A brute-force, linear-scan ANN stand-in.
//!
//! The manager only ever talks to an algorithm through `AnnIndex`; which
//! concrete algorithm (HNSW, IVF, flat) sits behind it is out of scope for
//! this workspace. This crate exists only so the manager has a concrete,
//! testable implementation to drive.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use vim_core::index::{AnnIndex, IndexFactory};
use vim_core::{IndexParams, ManagerError, ManagerResult, SearchHit, VectorWithId};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    vector_id: u64,
    values: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    dimension: usize,
    entries: Vec<Entry>,
}

/// Rebuild/save thresholds, analogous to what an HNSW implementation might
/// pick for "too many tombstones" or "too far behind the last snapshot".
#[derive(Debug, Clone, Copy)]
pub struct FlatIndexPolicy {
    pub rebuild_lag: u64,
    pub save_lag: u64,
}

impl Default for FlatIndexPolicy {
    fn default() -> Self {
        Self {
            rebuild_lag: 1_000_000,
            save_lag: 1_000,
        }
    }
}

pub struct FlatIndex {
    dimension: usize,
    policy: FlatIndexPolicy,
    entries: RwLock<HashMap<u64, Vec<f32>>>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self::with_policy(dimension, FlatIndexPolicy::default())
    }

    pub fn with_policy(dimension: usize, policy: FlatIndexPolicy) -> Self {
        Self {
            dimension,
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn from_state(state: PersistedState, policy: FlatIndexPolicy) -> Self {
        let entries = state
            .entries
            .into_iter()
            .map(|e| (e.vector_id, e.values))
            .collect();
        Self {
            dimension: state.dimension,
            policy,
            entries: RwLock::new(entries),
        }
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

impl AnnIndex for FlatIndex {
    fn upsert(&self, vectors: &[VectorWithId]) -> ManagerResult<()> {
        let mut entries = self.entries.write();
        for v in vectors {
            if v.values.len() != self.dimension {
                return Err(ManagerError::Internal(format!(
                    "vector {} has dimension {}, expected {}",
                    v.vector_id,
                    v.values.len(),
                    self.dimension
                )));
            }
            entries.insert(v.vector_id, v.values.clone());
        }
        Ok(())
    }

    fn delete(&self, ids: &[u64]) -> ManagerResult<()> {
        let mut entries = self.entries.write();
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> ManagerResult<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(ManagerError::Internal(format!(
                "query has dimension {}, expected {}",
                query.len(),
                self.dimension
            )));
        }
        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|(id, values)| SearchHit {
                vector_id: *id,
                distance: l2_distance(query, values),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        hits.truncate(top_k);
        Ok(hits)
    }

    fn count(&self) -> usize {
        self.entries.read().len()
    }

    fn need_rebuild(&self, lag: u64) -> bool {
        lag >= self.policy.rebuild_lag
    }

    fn need_save(&self, lag: u64) -> bool {
        lag >= self.policy.save_lag
    }

    fn save_state(&self) -> ManagerResult<Vec<u8>> {
        let entries = self.entries.read();
        let state = PersistedState {
            dimension: self.dimension,
            entries: entries
                .iter()
                .map(|(id, values)| Entry {
                    vector_id: *id,
                    values: values.clone(),
                })
                .collect(),
        };
        serde_json::to_vec(&state).map_err(|e| ManagerError::Internal(e.to_string()))
    }
}

/// Builds `FlatIndex` instances. `IndexParams::extra` may carry
/// `"rebuild_lag"`/`"save_lag"` overrides (parsed as `u64`); anything else
/// falls back to `FlatIndexPolicy::default()`.
#[derive(Debug, Default)]
pub struct FlatIndexFactory;

impl FlatIndexFactory {
    fn policy_from(params: &IndexParams) -> FlatIndexPolicy {
        let mut policy = FlatIndexPolicy::default();
        if let Some(v) = params.extra.get("rebuild_lag").and_then(|s| s.parse().ok()) {
            policy.rebuild_lag = v;
        }
        if let Some(v) = params.extra.get("save_lag").and_then(|s| s.parse().ok()) {
            policy.save_lag = v;
        }
        policy
    }
}

impl IndexFactory for FlatIndexFactory {
    fn empty(&self, params: &IndexParams) -> Arc<dyn AnnIndex> {
        Arc::new(FlatIndex::with_policy(
            params.dimension,
            Self::policy_from(params),
        ))
    }

    fn load(&self, params: &IndexParams, bytes: &[u8]) -> ManagerResult<Arc<dyn AnnIndex>> {
        let state: PersistedState =
            serde_json::from_slice(bytes).map_err(|e| ManagerError::Codec(e.to_string()))?;
        Ok(Arc::new(FlatIndex::from_state(
            state,
            Self::policy_from(params),
        )))
    }
}
