use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::engine::{EngineIndexInfo, EngineIndexSpec, IndexEngine, QueryMatrix, SearchResponse, flat};
use crate::error::{VectorDbError, VectorDbResult};
use crate::models::VectorId;

#[derive(Debug)]
struct EngineIndex {
    spec: EngineIndexSpec,
    trained: bool,
    ids: Vec<VectorId>,
    data: Vec<f32>,
    /// id -> row
    positions: HashMap<VectorId, usize>,
}

impl EngineIndex {
    fn new(spec: EngineIndexSpec) -> Self {
        Self {
            spec,
            trained: false,
            ids: Vec::new(),
            data: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn upsert(&mut self, id: VectorId, row: &[f32]) {
        let dimension = self.spec.dimension;
        match self.positions.get(&id) {
            Some(&pos) => self.data[pos * dimension..(pos + 1) * dimension].copy_from_slice(row),
            None => {
                self.positions.insert(id, self.ids.len());
                self.ids.push(id);
                self.data.extend_from_slice(row);
            }
        }
    }
}

/// In-process engine (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryEngine {
    indexes: Arc<RwLock<HashMap<(String, String), EngineIndex>>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(db: &str, index: &str) -> (String, String) {
    (db.to_string(), index.to_string())
}

fn missing(db: &str, index: &str) -> VectorDbError {
    VectorDbError::Engine(format!("index {db}/{index} is not loaded"))
}

#[async_trait]
impl IndexEngine for InMemoryEngine {
    async fn create_index(
        &self,
        db: &str,
        index: &str,
        spec: &EngineIndexSpec,
    ) -> VectorDbResult<()> {
        let mut indexes = self.indexes.write().await;
        indexes
            .entry(key(db, index))
            .or_insert_with(|| EngineIndex::new(spec.clone()));
        Ok(())
    }

    async fn delete_index(&self, db: &str, index: &str) -> VectorDbResult<()> {
        self.indexes.write().await.remove(&key(db, index));
        Ok(())
    }

    async fn get_index(&self, db: &str, index: &str) -> VectorDbResult<Option<EngineIndexInfo>> {
        let indexes = self.indexes.read().await;
        Ok(indexes.get(&key(db, index)).map(|entry| EngineIndexInfo {
            dimension: entry.spec.dimension,
            descriptor: entry.spec.descriptor.clone(),
            metric: entry.spec.metric,
            n_probe: entry.spec.n_probe,
            trained: entry.trained,
            ntotal: entry.ids.len() as u64,
        }))
    }

    async fn train_model(
        &self,
        db: &str,
        index: &str,
        count: usize,
        vectors: &[f32],
    ) -> VectorDbResult<()> {
        let mut indexes = self.indexes.write().await;
        let entry = indexes
            .get_mut(&key(db, index))
            .ok_or_else(|| missing(db, index))?;

        flat::check_rows(count, vectors, entry.spec.dimension)?;
        if count == 0 {
            return Err(VectorDbError::Engine("cannot train on zero vectors".to_string()));
        }
        entry.trained = true;
        debug!(db, index, count, "Model trained");
        Ok(())
    }

    async fn encode_vectors(
        &self,
        db: &str,
        index: &str,
        count: usize,
        vectors: &[f32],
        ids: &[VectorId],
    ) -> VectorDbResult<()> {
        let mut indexes = self.indexes.write().await;
        let entry = indexes
            .get_mut(&key(db, index))
            .ok_or_else(|| missing(db, index))?;

        if !entry.trained {
            return Err(VectorDbError::Engine(format!(
                "index {db}/{index} must be trained before adding vectors"
            )));
        }
        flat::check_rows(count, vectors, entry.spec.dimension)?;
        if ids.len() != count {
            return Err(VectorDbError::Engine(format!(
                "{} ids for {} vectors",
                ids.len(),
                count
            )));
        }

        let dimension = entry.spec.dimension;
        for (row, &id) in vectors.chunks_exact(dimension).zip(ids) {
            entry.upsert(id, row);
        }
        Ok(())
    }

    async fn search_vectors(
        &self,
        db: &str,
        index: &str,
        queries: &QueryMatrix,
        k: u32,
        _n_probe: u32,
    ) -> VectorDbResult<SearchResponse> {
        let indexes = self.indexes.read().await;
        let entry = indexes
            .get(&key(db, index))
            .ok_or_else(|| missing(db, index))?;

        flat::search(
            entry.spec.metric,
            &entry.data,
            &entry.ids,
            entry.spec.dimension,
            queries,
            k as usize,
        )
    }

    async fn close(&self) -> VectorDbResult<()> {
        self.indexes.write().await.clear();
        Ok(())
    }
}
