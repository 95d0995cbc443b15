//! Native vector-index engine boundary
//!
//! The engine owns the ANN structures, keyed by `(db, index)`. It is shared by
//! every request of the process and must be safe to call concurrently.

pub mod flat;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VectorDbResult;
use crate::models::{MetricType, VectorId};

pub use self::memory::InMemoryEngine;
pub use self::redis::RedisEngine;

/// Parameters an engine index is created with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineIndexSpec {
    pub dimension: usize,
    /// Factory descriptor, e.g. `IVF256,PQ16np`
    pub descriptor: String,
    pub metric: MetricType,
    pub n_probe: u32,
}

/// What the engine reports about one of its indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineIndexInfo {
    pub dimension: usize,
    pub descriptor: String,
    pub metric: MetricType,
    pub n_probe: u32,
    pub trained: bool,
    /// Number of encoded vectors
    pub ntotal: u64,
}

/// Row-major batch of query vectors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMatrix {
    pub data: Vec<f32>,
    pub rows: usize,
    pub dimension: usize,
}

impl QueryMatrix {
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: VectorId,
    pub distance: f32,
}

/// One ranked hit list per query row, best first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<Vec<SearchHit>>,
}

/// Engine operations used by the lifecycle manager, reindexer and dispatcher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexEngine: Send + Sync {
    /// Idempotent for an existing `(db, index)`
    async fn create_index(&self, db: &str, index: &str, spec: &EngineIndexSpec)
    -> VectorDbResult<()>;

    /// Releasing an index the engine does not hold is not an error
    async fn delete_index(&self, db: &str, index: &str) -> VectorDbResult<()>;

    async fn get_index(&self, db: &str, index: &str) -> VectorDbResult<Option<EngineIndexInfo>>;

    /// `vectors` holds `count` rows of the index dimension
    async fn train_model(
        &self,
        db: &str,
        index: &str,
        count: usize,
        vectors: &[f32],
    ) -> VectorDbResult<()>;

    /// Requires a trained index. Re-encoding an id replaces its vector.
    async fn encode_vectors(
        &self,
        db: &str,
        index: &str,
        count: usize,
        vectors: &[f32],
        ids: &[VectorId],
    ) -> VectorDbResult<()>;

    async fn search_vectors(
        &self,
        db: &str,
        index: &str,
        queries: &QueryMatrix,
        k: u32,
        n_probe: u32,
    ) -> VectorDbResult<SearchResponse>;

    async fn close(&self) -> VectorDbResult<()>;
}
