//! Paginated store-to-engine encode pipeline

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::codec::VectorPage;
use crate::config::VectorDbConfig;
use crate::engine::IndexEngine;
use crate::error::{VectorDbError, VectorDbResult};
use crate::lifecycle::engine_failure;
use crate::models::{Index, IndexState};
use crate::repository::VectorDbRepository;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReindexReport {
    /// Non-empty pages handed to the engine
    pub pages: usize,
    pub vectors_encoded: u64,
    pub start_offset: u64,
}

pub struct BatchReindexer<R: VectorDbRepository, E: IndexEngine> {
    repository: Arc<R>,
    engine: Arc<E>,
    page_size: usize,
}

impl<R: VectorDbRepository, E: IndexEngine> Clone for BatchReindexer<R, E> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            engine: Arc::clone(&self.engine),
            page_size: self.page_size,
        }
    }
}

impl<R: VectorDbRepository, E: IndexEngine> BatchReindexer<R, E> {
    pub fn new(repository: Arc<R>, engine: Arc<E>, config: &VectorDbConfig) -> Self {
        Self {
            repository,
            engine,
            page_size: config.reindex_page_size,
        }
    }

    async fn load_trained(&self, db: &str, name: &str) -> VectorDbResult<Index> {
        let index = self
            .repository
            .find_index(db, name)
            .await?
            .ok_or_else(|| VectorDbError::index_not_found(db, name))?;

        if index.state == IndexState::Failed {
            return Err(VectorDbError::IndexFailed(name.to_string()));
        }
        if !index.state.is_searchable() {
            return Err(VectorDbError::IndexNotTrained {
                index: name.to_string(),
                state: index.state.to_string(),
            });
        }
        Ok(index)
    }

    /// Encode every vector of the database from offset 0
    #[instrument(skip(self))]
    pub async fn reindex(&self, db: &str, name: &str) -> VectorDbResult<ReindexReport> {
        let index = self.load_trained(db, name).await?;
        self.sweep(&index, 0).await
    }

    /// Continue an interrupted sweep from the persisted size
    ///
    /// Only an INDEXING index has a meaningful resume point; any other state
    /// starts from offset 0.
    #[instrument(skip(self))]
    pub async fn resume(&self, db: &str, name: &str) -> VectorDbResult<ReindexReport> {
        let index = self.load_trained(db, name).await?;
        let start = match index.state {
            IndexState::Indexing => index.size,
            _ => 0,
        };
        self.sweep(&index, start).await
    }

    async fn sweep(&self, index: &Index, start_offset: u64) -> VectorDbResult<ReindexReport> {
        let db = index.db_name.as_str();
        let name = index.name.as_str();
        let mut report = ReindexReport {
            start_offset,
            ..ReindexReport::default()
        };
        let mut offset = start_offset;

        loop {
            let records = self
                .repository
                .find_vectors(db, self.page_size, offset)
                .await?;
            if records.is_empty() {
                break;
            }

            let page = VectorPage::from_records(&records, index.dimension())?;
            if let Err(e) = self
                .engine
                .encode_vectors(db, name, page.count(), &page.data, &page.ids)
                .await
            {
                warn!(db, index = name, offset, error = %e, "Encoding failed");
                if let Err(store_err) = self
                    .repository
                    .update_index_state(db, name, IndexState::Failed, offset)
                    .await
                {
                    warn!(db, index = name, error = %store_err, "Failed to record FAILED state");
                }
                return Err(engine_failure(e));
            }

            offset += records.len() as u64;
            report.pages += 1;
            report.vectors_encoded += page.count() as u64;

            self.repository
                .update_index_state(db, name, IndexState::Indexing, offset)
                .await?;
            debug!(db, index = name, offset, "Page encoded");
        }

        if report.vectors_encoded > 0 || start_offset > 0 {
            self.repository
                .update_index_state(db, name, IndexState::Ready, offset)
                .await?;
        }

        info!(
            db,
            index = name,
            pages = report.pages,
            encoded = report.vectors_encoded,
            size = offset,
            "Reindex finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::engine::MockIndexEngine;
    use crate::error::ErrorKind;
    use crate::models::{CreateIndex, IndexConfig, VectorRecord};
    use crate::repository::MockVectorDbRepository;

    fn stored(state: IndexState, size: u64) -> Index {
        let mut index = Index::new(
            "images",
            CreateIndex {
                name: "ivfpq1".to_string(),
                config: IndexConfig::new(2, 8, 2),
            },
        );
        index.state = state;
        index.size = size;
        index
    }

    /// Serve `total` vectors in insertion order, as the store would
    fn page(db: &str, limit: usize, skip: u64, total: u64) -> Vec<VectorRecord> {
        (skip..total)
            .take(limit)
            .map(|id| VectorRecord {
                db: db.to_string(),
                id: id as i64,
                data: codec::encode(&[id as f32, 0.5]),
            })
            .collect()
    }

    fn reindexer(
        repo: MockVectorDbRepository,
        engine: MockIndexEngine,
        page_size: usize,
    ) -> BatchReindexer<MockVectorDbRepository, MockIndexEngine> {
        let config = VectorDbConfig::default().with_reindex_page_size(page_size);
        BatchReindexer::new(Arc::new(repo), Arc::new(engine), &config)
    }

    #[tokio::test]
    async fn test_zero_vectors_queries_once_and_writes_nothing() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Trained, 0))));
        repo.expect_find_vectors()
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));
        repo.expect_update_index_state().never();

        let mut engine = MockIndexEngine::new();
        engine.expect_encode_vectors().never();

        let report = reindexer(repo, engine, 10)
            .reindex("images", "ivfpq1")
            .await
            .unwrap();
        assert_eq!(report, ReindexReport::default());
    }

    #[tokio::test]
    async fn test_pages_cover_every_id_once() {
        const TOTAL: u64 = 25;
        const PAGE: usize = 10;

        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Trained, 0))));
        repo.expect_find_vectors()
            .times(4)
            .returning(|db, limit, skip| Ok(page(db, limit, skip, TOTAL)));
        repo.expect_update_index_state()
            .withf(|_, _, state, _| *state == IndexState::Indexing)
            .times(3)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_update_index_state()
            .withf(|_, _, state, size| *state == IndexState::Ready && *size == TOTAL)
            .times(1)
            .returning(|_, _, _, _| Ok(true));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut engine = MockIndexEngine::new();
        engine
            .expect_encode_vectors()
            .times(3)
            .returning(move |_, _, count, vectors, ids| {
                assert_eq!(vectors.len(), count * 2);
                sink.lock().unwrap().extend_from_slice(ids);
                Ok(())
            });

        let report = reindexer(repo, engine, PAGE)
            .reindex("images", "ivfpq1")
            .await
            .unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.vectors_encoded, TOTAL);
        assert_eq!(*seen.lock().unwrap(), (0..TOTAL as i64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_untrained_index_is_rejected() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Created, 0))));

        let err = reindexer(repo, MockIndexEngine::new(), 10)
            .reindex("images", "ivfpq1")
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDbError::IndexNotTrained { .. }));
    }

    #[tokio::test]
    async fn test_failed_index_must_be_recreated() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Failed, 10))));
        repo.expect_find_vectors().never();

        let reindexer = reindexer(repo, MockIndexEngine::new(), 10);

        let err = reindexer.reindex("images", "ivfpq1").await.unwrap_err();
        assert!(matches!(err, VectorDbError::IndexFailed(_)));

        let err = reindexer.resume("images", "ivfpq1").await.unwrap_err();
        assert!(matches!(err, VectorDbError::IndexFailed(_)));
    }

    #[tokio::test]
    async fn test_engine_failure_records_failed_with_progress() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Trained, 0))));
        repo.expect_find_vectors()
            .returning(|db, limit, skip| Ok(page(db, limit, skip, 30)));
        repo.expect_update_index_state()
            .withf(|_, _, state, _| *state == IndexState::Indexing)
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_update_index_state()
            .withf(|_, _, state, size| *state == IndexState::Failed && *size == 10)
            .times(1)
            .returning(|_, _, _, _| Ok(true));

        let mut engine = MockIndexEngine::new();
        let mut calls = 0;
        engine
            .expect_encode_vectors()
            .times(2)
            .returning(move |_, _, _, _, _| {
                calls += 1;
                if calls == 2 {
                    Err(VectorDbError::Engine("connection reset".to_string()))
                } else {
                    Ok(())
                }
            });

        let err = reindexer(repo, engine, 10)
            .reindex("images", "ivfpq1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    }

    #[tokio::test]
    async fn test_resume_starts_at_persisted_size() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Indexing, 20))));
        repo.expect_find_vectors()
            .withf(|_, _, skip| *skip >= 20)
            .times(2)
            .returning(|db, limit, skip| Ok(page(db, limit, skip, 25)));
        repo.expect_update_index_state()
            .withf(|_, _, state, size| *state == IndexState::Indexing && *size == 25)
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_update_index_state()
            .withf(|_, _, state, size| *state == IndexState::Ready && *size == 25)
            .times(1)
            .returning(|_, _, _, _| Ok(true));

        let mut engine = MockIndexEngine::new();
        engine
            .expect_encode_vectors()
            .withf(|_, _, count, _, ids| *count == 5 && ids[0] == 20)
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let report = reindexer(repo, engine, 10)
            .resume("images", "ivfpq1")
            .await
            .unwrap();
        assert_eq!(report.start_offset, 20);
        assert_eq!(report.vectors_encoded, 5);
    }
}
