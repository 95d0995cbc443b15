//! Query validation and search dispatch

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::engine::{IndexEngine, QueryMatrix, SearchResponse};
use crate::error::{VectorDbError, VectorDbResult};
use crate::lifecycle::engine_failure;
use crate::repository::VectorDbRepository;

pub struct QueryDispatcher<R: VectorDbRepository, E: IndexEngine> {
    repository: Arc<R>,
    engine: Arc<E>,
}

impl<R: VectorDbRepository, E: IndexEngine> Clone for QueryDispatcher<R, E> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            engine: Arc::clone(&self.engine),
        }
    }
}

/// Pack a batch into one row-major buffer; every row must share the first
/// row's non-zero width
pub fn pack_queries(queries: &[Vec<f32>]) -> VectorDbResult<QueryMatrix> {
    let Some(first) = queries.first() else {
        return Err(VectorDbError::InvalidConfig(
            "at least one query vector is required".to_string(),
        ));
    };
    let dimension = first.len();
    if dimension == 0 {
        return Err(VectorDbError::InvalidConfig(
            "query vectors must not be empty".to_string(),
        ));
    }

    let mut data = Vec::with_capacity(queries.len() * dimension);
    for query in queries {
        if query.len() != dimension {
            return Err(VectorDbError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        data.extend_from_slice(query);
    }

    Ok(QueryMatrix {
        data,
        rows: queries.len(),
        dimension,
    })
}

impl<R: VectorDbRepository, E: IndexEngine> QueryDispatcher<R, E> {
    pub fn new(repository: Arc<R>, engine: Arc<E>) -> Self {
        Self { repository, engine }
    }

    /// k-nearest-neighbor search over one index
    #[instrument(skip(self, queries), fields(rows = queries.len()))]
    pub async fn search(
        &self,
        db: &str,
        index: Option<&str>,
        queries: &[Vec<f32>],
        k: u32,
        n_probe: u32,
    ) -> VectorDbResult<SearchResponse> {
        let name = match index {
            Some(name) if !name.is_empty() => name,
            _ => return Err(VectorDbError::CrossIndexSearch),
        };

        let matrix = pack_queries(queries)?;
        if k == 0 {
            return Err(VectorDbError::InvalidConfig("k must be at least 1".to_string()));
        }
        if n_probe == 0 {
            return Err(VectorDbError::InvalidConfig(
                "n_probe must be at least 1".to_string(),
            ));
        }

        let record = self
            .repository
            .find_index(db, name)
            .await?
            .ok_or_else(|| VectorDbError::index_not_found(db, name))?;

        if matrix.dimension != record.dimension() {
            return Err(VectorDbError::DimensionMismatch {
                expected: record.dimension(),
                actual: matrix.dimension,
            });
        }
        if !record.state.is_searchable() {
            return Err(VectorDbError::IndexNotReady {
                index: name.to_string(),
                state: record.state.to_string(),
            });
        }

        debug!(db, index = name, k, n_probe, "Dispatching search");
        self.engine
            .search_vectors(db, name, &matrix, k, n_probe)
            .await
            .map_err(engine_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockIndexEngine, SearchHit};
    use crate::error::ErrorKind;
    use crate::models::{CreateIndex, Index, IndexConfig, IndexState};
    use crate::repository::MockVectorDbRepository;

    fn stored(state: IndexState) -> Index {
        let mut index = Index::new(
            "images",
            CreateIndex {
                name: "ivfpq1".to_string(),
                config: IndexConfig::new(3, 8, 2),
            },
        );
        index.state = state;
        index
    }

    fn dispatcher(
        repo: MockVectorDbRepository,
        engine: MockIndexEngine,
    ) -> QueryDispatcher<MockVectorDbRepository, MockIndexEngine> {
        QueryDispatcher::new(Arc::new(repo), Arc::new(engine))
    }

    #[tokio::test]
    async fn test_missing_index_name_is_unsupported() {
        let dispatcher = dispatcher(MockVectorDbRepository::new(), MockIndexEngine::new());

        for index in [None, Some("")] {
            let err = dispatcher
                .search("images", index, &[vec![1.0, 2.0, 3.0]], 10, 4)
                .await
                .unwrap_err();
            assert!(matches!(err, VectorDbError::CrossIndexSearch));
        }

        // Checked before the queries are looked at
        let err = dispatcher.search("images", None, &[], 0, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_invalid_k_and_n_probe() {
        let dispatcher = dispatcher(MockVectorDbRepository::new(), MockIndexEngine::new());
        let queries = [vec![1.0, 2.0, 3.0]];

        let err = dispatcher
            .search("images", Some("ivfpq1"), &queries, 0, 4)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let err = dispatcher
            .search("images", Some("ivfpq1"), &queries, 10, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_pack_rejects_ragged_batch() {
        let err = pack_queries(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            VectorDbError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert!(pack_queries(&[]).is_err());
    }

    #[tokio::test]
    async fn test_dimension_must_match_index() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Ready))));

        let err = dispatcher(repo, MockIndexEngine::new())
            .search("images", Some("ivfpq1"), &[vec![1.0, 2.0]], 10, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDbError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_untrained_index_is_not_searchable() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Created))));

        let err = dispatcher(repo, MockIndexEngine::new())
            .search("images", Some("ivfpq1"), &[vec![1.0, 2.0, 3.0]], 10, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDbError::IndexNotReady { .. }));
        assert_eq!(err.status_code(), http::StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_results_are_returned_unmodified() {
        let mut repo = MockVectorDbRepository::new();
        repo.expect_find_index()
            .returning(|_, _| Ok(Some(stored(IndexState::Trained))));

        let mut engine = MockIndexEngine::new();
        engine
            .expect_search_vectors()
            .withf(|_, _, queries, k, n_probe| {
                queries.rows == 2 && queries.dimension == 3 && *k == 5 && *n_probe == 4
            })
            .returning(|_, _, _, _, _| {
                Ok(SearchResponse {
                    results: vec![
                        vec![SearchHit { id: 7, distance: 0.5 }],
                        vec![SearchHit { id: 9, distance: 1.5 }],
                    ],
                })
            });

        let response = dispatcher(repo, engine)
            .search(
                "images",
                Some("ivfpq1"),
                &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
                5,
                4,
            )
            .await
            .unwrap();
        assert_eq!(response.results[0][0].id, 7);
        assert_eq!(response.results[1][0].distance, 1.5);
    }
}
