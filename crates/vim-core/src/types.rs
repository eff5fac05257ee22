//! Data-model types shared across the workspace.

use std::collections::HashMap;

/// A shard of the key-value namespace, as provided by the external region
/// registry. Only the fields this subsystem actually consumes are modeled;
/// membership/raft-leadership details live outside this crate's scope.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: u64,
    pub index_params: IndexParams,
}

impl Region {
    pub fn new(id: u64, index_params: IndexParams) -> Self {
        Self { id, index_params }
    }
}

/// Parameters an `IndexFactory` uses to instantiate a fresh algorithm
/// instance for a region. Deliberately opaque beyond dimension: the concrete
/// ANN algorithm (HNSW, IVF, flat...) interprets `extra` however it likes.
#[derive(Debug, Clone, Default)]
pub struct IndexParams {
    pub dimension: usize,
    pub extra: HashMap<String, String>,
}

/// A vector record as it appears on the wire and in base storage.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorWithId {
    pub vector_id: u64,
    pub values: Vec<f32>,
    pub scalar_payload: HashMap<String, String>,
}

impl VectorWithId {
    pub fn new(vector_id: u64, values: Vec<f32>) -> Self {
        Self {
            vector_id,
            values,
            scalar_payload: HashMap::new(),
        }
    }
}

/// One hit returned from `AnnIndex::search`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub vector_id: u64,
    pub distance: f32,
}
