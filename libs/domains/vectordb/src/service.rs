use std::sync::Arc;

use tracing::{info, instrument};
use validator::Validate;

use crate::codec;
use crate::config::VectorDbConfig;
use crate::engine::{IndexEngine, SearchResponse};
use crate::error::{VectorDbError, VectorDbResult};
use crate::lifecycle::IndexLifecycleManager;
use crate::models::{CreateDatabase, CreateIndex, Database, Index, Vector, VectorId, VectorRecord};
use crate::query::QueryDispatcher;
use crate::reindexer::{BatchReindexer, ReindexReport};
use crate::repository::VectorDbRepository;

/// Entry point for every database, vector, index and search operation
///
/// Holds no per-request state. Build one per process: the engine handle it
/// wraps is shared by every clone.
pub struct VectorDbService<R: VectorDbRepository, E: IndexEngine> {
    repository: Arc<R>,
    engine: Arc<E>,
    config: VectorDbConfig,
    lifecycle: IndexLifecycleManager<R, E>,
    reindexer: BatchReindexer<R, E>,
    dispatcher: QueryDispatcher<R, E>,
}

impl<R: VectorDbRepository, E: IndexEngine> Clone for VectorDbService<R, E> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
            lifecycle: self.lifecycle.clone(),
            reindexer: self.reindexer.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<R: VectorDbRepository, E: IndexEngine> VectorDbService<R, E> {
    pub fn new(repository: R, engine: E, config: VectorDbConfig) -> Self {
        let repository = Arc::new(repository);
        let engine = Arc::new(engine);

        Self {
            lifecycle: IndexLifecycleManager::new(
                Arc::clone(&repository),
                Arc::clone(&engine),
                &config,
            ),
            reindexer: BatchReindexer::new(Arc::clone(&repository), Arc::clone(&engine), &config),
            dispatcher: QueryDispatcher::new(Arc::clone(&repository), Arc::clone(&engine)),
            repository,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &VectorDbConfig {
        &self.config
    }

    async fn require_database(&self, name: &str) -> VectorDbResult<Database> {
        self.repository
            .find_database(name)
            .await?
            .ok_or_else(|| VectorDbError::DatabaseNotFound(name.to_string()))
    }

    // ===== Databases =====

    pub async fn list_databases(&self) -> VectorDbResult<Vec<Database>> {
        self.repository.list_databases().await
    }

    #[instrument(skip(self, input), fields(db = %input.name))]
    pub async fn create_database(&self, input: CreateDatabase) -> VectorDbResult<Database> {
        input.validate()?;
        let database = self.repository.create_database(Database::new(input)).await?;
        info!(db = %database.name, "Database created");
        Ok(database)
    }

    pub async fn get_database(&self, name: &str) -> VectorDbResult<Database> {
        self.require_database(name).await
    }

    /// Cascade: indexes, then vectors, then the database record
    #[instrument(skip(self))]
    pub async fn delete_database(&self, name: &str) -> VectorDbResult<()> {
        self.require_database(name).await?;

        for index in self.repository.list_indexes(name).await? {
            self.lifecycle.delete_index(name, &index.name).await?;
        }

        if !self.repository.delete_vectors(name).await? {
            return Err(VectorDbError::PartialDelete(name.to_string()));
        }

        self.repository.delete_database(name).await?;
        info!(db = name, "Database deleted");
        Ok(())
    }

    // ===== Vectors =====

    pub async fn get_vectors(&self, db: &str, ids: Vec<VectorId>) -> VectorDbResult<Vec<Vector>> {
        self.require_database(db).await?;

        self.repository
            .get_vectors(db, ids)
            .await?
            .into_iter()
            .map(|record| Ok(Vector::new(record.id, codec::decode(&record.data)?)))
            .collect()
    }

    /// Store a batch of vectors; returns the number accepted
    #[instrument(skip(self, vectors), fields(count = vectors.len()))]
    pub async fn put_vectors(&self, db: &str, vectors: Vec<Vector>) -> VectorDbResult<usize> {
        self.require_database(db).await?;

        let Some(dimension) = vectors.first().map(|v| v.data.len()) else {
            return Err(VectorDbError::InvalidConfig(
                "at least one vector is required".to_string(),
            ));
        };
        if dimension == 0 {
            return Err(VectorDbError::InvalidConfig(
                "vectors must not be empty".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.data.len() != dimension) {
            return Err(VectorDbError::DimensionMismatch {
                expected: dimension,
                actual: bad.data.len(),
            });
        }
        for index in self.repository.list_indexes(db).await? {
            if index.dimension() != dimension {
                return Err(VectorDbError::DimensionMismatch {
                    expected: index.dimension(),
                    actual: dimension,
                });
            }
        }

        let count = vectors.len();
        let records: Vec<VectorRecord> = vectors
            .into_iter()
            .map(|v| VectorRecord {
                db: db.to_string(),
                id: v.id,
                data: codec::encode(&v.data),
            })
            .collect();

        if !self.repository.create_vectors(records).await? {
            return Err(VectorDbError::StoreWrite(format!(
                "vectors for database {db} were not acknowledged"
            )));
        }
        self.repository
            .increment_database_size(db, count as u64)
            .await?;

        info!(db, count, "Vectors stored");
        Ok(count)
    }

    // ===== Indexes =====

    pub async fn create_index(&self, db: &str, input: CreateIndex) -> VectorDbResult<Index> {
        self.lifecycle.create_index(db, input).await
    }

    pub async fn delete_index(&self, db: &str, name: &str) -> VectorDbResult<()> {
        self.lifecycle.delete_index(db, name).await
    }

    pub async fn get_index(&self, db: &str, name: &str) -> VectorDbResult<Index> {
        self.lifecycle.get_index(db, name).await
    }

    pub async fn list_indexes(&self, db: &str) -> VectorDbResult<Vec<Index>> {
        self.lifecycle.list_indexes(db).await
    }

    pub async fn train_index(&self, db: &str, name: &str) -> VectorDbResult<Index> {
        self.lifecycle.train_index(db, name).await
    }

    pub async fn reindex(&self, db: &str, name: &str) -> VectorDbResult<ReindexReport> {
        self.reindexer.reindex(db, name).await
    }

    pub async fn resume_reindex(&self, db: &str, name: &str) -> VectorDbResult<ReindexReport> {
        self.reindexer.resume(db, name).await
    }

    pub async fn reconcile_index(&self, db: &str, name: &str) -> VectorDbResult<bool> {
        self.lifecycle.reconcile_index(db, name).await
    }

    // ===== Search =====

    /// `k` and `n_probe` fall back to the configured defaults
    pub async fn search(
        &self,
        db: &str,
        index: Option<&str>,
        queries: &[Vec<f32>],
        k: Option<u32>,
        n_probe: Option<u32>,
    ) -> VectorDbResult<SearchResponse> {
        self.dispatcher
            .search(
                db,
                index,
                queries,
                k.unwrap_or(self.config.default_k),
                n_probe.unwrap_or(self.config.default_n_probe),
            )
            .await
    }

    /// Release the engine handle
    pub async fn shutdown(&self) -> VectorDbResult<()> {
        info!("Shutting down index engine");
        self.engine.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockIndexEngine;
    use crate::models::IndexConfig;
    use crate::repository::MockVectorDbRepository;

    fn service(
        repo: MockVectorDbRepository,
        engine: MockIndexEngine,
    ) -> VectorDbService<MockVectorDbRepository, MockIndexEngine> {
        VectorDbService::new(repo, engine, VectorDbConfig::default())
    }

    fn database(name: &str) -> Database {
        Database::new(CreateDatabase {
            name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn test_delete_missing_database_deletes_no_vectors() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_database().returning(|_| Ok(None));
        repo.expect_delete_vectors().never();
        repo.expect_delete_database().never();

        let err = service(repo, MockIndexEngine::new())
            .delete_database("images")
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDbError::DatabaseNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_database_cascades_indexes() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_database()
            .returning(|name| Ok(Some(database(name))));
        repo.expect_list_indexes().returning(|db| {
            Ok(vec![Index::new(
                db,
                CreateIndex {
                    name: "ivfpq1".to_string(),
                    config: IndexConfig::new(2, 8, 2),
                },
            )])
        });
        repo.expect_delete_index()
            .withf(|db, name| db == "images" && name == "ivfpq1")
            .times(1)
            .returning(|_, _| Ok(true));
        repo.expect_delete_vectors().times(1).returning(|_| Ok(true));
        repo.expect_delete_database()
            .times(1)
            .returning(|_| Ok(true));

        let mut engine = MockIndexEngine::new();
        engine
            .expect_delete_index()
            .times(1)
            .returning(|_, _| Ok(()));

        assert!(service(repo, engine).delete_database("images").await.is_ok());
    }

    #[tokio::test]
    async fn test_vector_delete_failure_is_partial_delete() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_database()
            .returning(|name| Ok(Some(database(name))));
        repo.expect_list_indexes().returning(|_| Ok(Vec::new()));
        repo.expect_delete_vectors().returning(|_| Ok(false));
        repo.expect_delete_database().never();

        let err = service(repo, MockIndexEngine::new())
            .delete_database("images")
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDbError::PartialDelete(_)));
        assert_eq!(err.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_put_vectors_rejects_mixed_dimensions() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_database()
            .returning(|name| Ok(Some(database(name))));
        repo.expect_create_vectors().never();

        let err = service(repo, MockIndexEngine::new())
            .put_vectors(
                "images",
                vec![Vector::new(1, vec![1.0, 2.0]), Vector::new(2, vec![1.0])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDbError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_put_vectors_must_match_existing_indexes() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_database()
            .returning(|name| Ok(Some(database(name))));
        repo.expect_list_indexes().returning(|db| {
            Ok(vec![Index::new(
                db,
                CreateIndex {
                    name: "ivfpq1".to_string(),
                    config: IndexConfig::new(4, 8, 2),
                },
            )])
        });
        repo.expect_create_vectors().never();

        let err = service(repo, MockIndexEngine::new())
            .put_vectors("images", vec![Vector::new(1, vec![1.0, 2.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorDbError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_put_vectors_store_refusal_is_store_write() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_database()
            .returning(|name| Ok(Some(database(name))));
        repo.expect_list_indexes().returning(|_| Ok(Vec::new()));
        repo.expect_create_vectors().returning(|_| Ok(false));
        repo.expect_increment_database_size().never();

        let err = service(repo, MockIndexEngine::new())
            .put_vectors("images", vec![Vector::new(1, vec![1.0, 2.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDbError::StoreWrite(_)));
    }

    #[tokio::test]
    async fn test_search_uses_configured_defaults() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index().returning(|db, name| {
            let mut index = Index::new(
                db,
                CreateIndex {
                    name: name.to_string(),
                    config: IndexConfig::new(2, 8, 2),
                },
            );
            index.state = crate::models::IndexState::Ready;
            Ok(Some(index))
        });

        let mut engine = MockIndexEngine::new();
        engine
            .expect_search_vectors()
            .withf(|_, _, _, k, n_probe| *k == 100 && *n_probe == 4)
            .times(1)
            .returning(|_, _, _, _, _| Ok(SearchResponse::default()));

        service(repo, engine)
            .search("images", Some("ivfpq1"), &[vec![0.0, 1.0]], None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_engine() {
        let mut engine = MockIndexEngine::new();
        engine.expect_close().times(1).returning(|| Ok(()));

        service(MockVectorDbRepository::new(), engine)
            .shutdown()
            .await
            .unwrap();
    }
}
