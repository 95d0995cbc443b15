//! End-to-end tests for the vector database service
//!
//! Run against the in-memory store and engine; container-backed variants
//! live in `store_test.rs`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain_vectordb::*;
use test_utils::TestDataBuilder;
use test_utils::assertions::{assert_close, assert_some};

/// In-memory engine that records the ids of every encode call
#[derive(Clone, Default)]
struct RecordingEngine {
    inner: InMemoryEngine,
    encode_calls: Arc<Mutex<Vec<Vec<VectorId>>>>,
}

impl RecordingEngine {
    fn encode_calls(&self) -> Vec<Vec<VectorId>> {
        self.encode_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IndexEngine for RecordingEngine {
    async fn create_index(
        &self,
        db: &str,
        index: &str,
        spec: &EngineIndexSpec,
    ) -> VectorDbResult<()> {
        self.inner.create_index(db, index, spec).await
    }

    async fn delete_index(&self, db: &str, index: &str) -> VectorDbResult<()> {
        self.inner.delete_index(db, index).await
    }

    async fn get_index(&self, db: &str, index: &str) -> VectorDbResult<Option<EngineIndexInfo>> {
        self.inner.get_index(db, index).await
    }

    async fn train_model(
        &self,
        db: &str,
        index: &str,
        count: usize,
        vectors: &[f32],
    ) -> VectorDbResult<()> {
        self.inner.train_model(db, index, count, vectors).await
    }

    async fn encode_vectors(
        &self,
        db: &str,
        index: &str,
        count: usize,
        vectors: &[f32],
        ids: &[VectorId],
    ) -> VectorDbResult<()> {
        self.encode_calls.lock().unwrap().push(ids.to_vec());
        self.inner
            .encode_vectors(db, index, count, vectors, ids)
            .await
    }

    async fn search_vectors(
        &self,
        db: &str,
        index: &str,
        queries: &QueryMatrix,
        k: u32,
        n_probe: u32,
    ) -> VectorDbResult<SearchResponse> {
        self.inner
            .search_vectors(db, index, queries, k, n_probe)
            .await
    }

    async fn close(&self) -> VectorDbResult<()> {
        self.inner.close().await
    }
}

fn service(
    engine: RecordingEngine,
    config: VectorDbConfig,
) -> VectorDbService<InMemoryVectorDbRepository, RecordingEngine> {
    VectorDbService::new(InMemoryVectorDbRepository::new(), engine, config)
}

fn ivfpq(name: &str, dimension: u32) -> CreateIndex {
    CreateIndex {
        name: name.to_string(),
        config: IndexConfig::new(dimension, 8, 2).with_metric(MetricType::L2),
    }
}

async fn seed(
    service: &VectorDbService<InMemoryVectorDbRepository, RecordingEngine>,
    db: &str,
    vectors: Vec<(VectorId, Vec<f32>)>,
) {
    service
        .create_database(CreateDatabase {
            name: db.to_string(),
        })
        .await
        .unwrap();
    service
        .put_vectors(
            db,
            vectors
                .into_iter()
                .map(|(id, data)| Vector::new(id, data))
                .collect(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_images_scenario() {
    let engine = RecordingEngine::default();
    let service = service(engine.clone(), VectorDbConfig::default());

    seed(
        &service,
        "images",
        vec![
            (1, vec![0.0, 0.0, 0.0, 0.0]),
            (2, vec![1.0, 1.0, 1.0, 1.0]),
            (3, vec![5.0, 5.0, 5.0, 5.0]),
        ],
    )
    .await;

    let index = service
        .create_index("images", ivfpq("ivfpq1", 4))
        .await
        .unwrap();
    assert_eq!(index.state, IndexState::Created);

    let trained = service.train_index("images", "ivfpq1").await.unwrap();
    assert_eq!(trained.state, IndexState::Trained);

    let report = service.reindex("images", "ivfpq1").await.unwrap();
    assert_eq!(report.pages, 1);
    assert_eq!(report.vectors_encoded, 3);

    let calls = engine.encode_calls();
    assert_eq!(calls.len(), 1);
    let mut ids = calls[0].clone();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);

    let stored = service.get_index("images", "ivfpq1").await.unwrap();
    assert_eq!(stored.state, IndexState::Ready);
    assert_eq!(stored.size, 3);

    let response = service
        .search(
            "images",
            Some("ivfpq1"),
            &[vec![0.9, 0.9, 0.9, 0.9]],
            Some(2),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    let hits = &response.results[0];
    assert!(hits.len() <= 2);
    assert!(hits.iter().all(|hit| [1, 2, 3].contains(&hit.id)));
    assert_eq!(hits[0].id, 2);
    assert_close(hits[0].distance, 0.04, 1e-5, "squared L2 to vector 2");
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn test_paged_reindex_covers_every_vector_once() {
    let builder = TestDataBuilder::from_test_name("paged_reindex");
    let engine = RecordingEngine::default();
    let config = VectorDbConfig::default().with_reindex_page_size(4);
    let service = service(engine.clone(), config);

    seed(&service, "audio", builder.vectors(10, 8)).await;
    service
        .create_index("audio", ivfpq("flat", 8))
        .await
        .unwrap();
    service.train_index("audio", "flat").await.unwrap();

    let report = service.reindex("audio", "flat").await.unwrap();
    assert_eq!(report.pages, 3);

    let calls = engine.encode_calls();
    assert_eq!(calls.len(), 3);
    let mut ids: Vec<VectorId> = calls.into_iter().flatten().collect();
    ids.sort();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());

    let database = service.get_database("audio").await.unwrap();
    assert_eq!(database.size, 10);
}

#[tokio::test]
async fn test_search_before_training_is_not_implemented() {
    let service = service(RecordingEngine::default(), VectorDbConfig::default());
    seed(&service, "images", vec![(1, vec![1.0, 2.0])]).await;
    service
        .create_index("images", ivfpq("ivfpq1", 2))
        .await
        .unwrap();

    let err = service
        .search("images", Some("ivfpq1"), &[vec![1.0, 2.0]], Some(1), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);

    let err = service
        .reindex("images", "ivfpq1")
        .await
        .unwrap_err();
    assert!(matches!(err, VectorDbError::IndexNotTrained { .. }));
}

#[tokio::test]
async fn test_train_empty_database() {
    let service = service(RecordingEngine::default(), VectorDbConfig::default());
    service
        .create_database(CreateDatabase {
            name: "empty".to_string(),
        })
        .await
        .unwrap();
    service
        .create_index("empty", ivfpq("ivfpq1", 4))
        .await
        .unwrap();

    let err = service.train_index("empty", "ivfpq1").await.unwrap_err();
    assert!(matches!(err, VectorDbError::EmptyTrainingSet(_)));

    // Still CREATED, so there is nothing to encode into
    let report = service.reindex("empty", "ivfpq1").await;
    assert!(matches!(report, Err(VectorDbError::IndexNotTrained { .. })));
}

#[tokio::test]
async fn test_duplicate_database_is_conflict() {
    let service = service(RecordingEngine::default(), VectorDbConfig::default());
    seed(&service, "images", vec![(1, vec![1.0])]).await;

    let err = service
        .create_database(CreateDatabase {
            name: "images".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(service.list_databases().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_vector_id_is_conflict() {
    let service = service(RecordingEngine::default(), VectorDbConfig::default());
    seed(&service, "images", vec![(1, vec![1.0, 2.0])]).await;

    let err = service
        .put_vectors("images", vec![Vector::new(1, vec![3.0, 4.0])])
        .await
        .unwrap_err();
    assert!(matches!(err, VectorDbError::VectorExists { id: 1, .. }));

    let stored = service.get_vectors("images", vec![1]).await.unwrap();
    assert_eq!(stored, vec![Vector::new(1, vec![1.0, 2.0])]);

    // A clash late in the batch keeps the earlier ids out and the size unchanged
    let err = service
        .put_vectors(
            "images",
            vec![Vector::new(2, vec![0.0, 1.0]), Vector::new(1, vec![5.0, 5.0])],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VectorDbError::VectorExists { id: 1, .. }));
    assert!(service.get_vectors("images", vec![2]).await.unwrap().is_empty());
    assert_eq!(service.get_database("images").await.unwrap().size, 1);
}

#[tokio::test]
async fn test_delete_database_cascades() {
    let engine = RecordingEngine::default();
    let service = service(engine.clone(), VectorDbConfig::default());
    seed(&service, "images", vec![(1, vec![1.0, 2.0])]).await;
    service
        .create_index("images", ivfpq("ivfpq1", 2))
        .await
        .unwrap();

    service.delete_database("images").await.unwrap();

    assert!(matches!(
        service.get_database("images").await,
        Err(VectorDbError::DatabaseNotFound(_))
    ));
    assert!(engine.get_index("images", "ivfpq1").await.unwrap().is_none());

    // Recreated database starts without the old vectors
    service
        .create_database(CreateDatabase {
            name: "images".to_string(),
        })
        .await
        .unwrap();
    assert!(service.get_vectors("images", vec![1]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reconcile_after_engine_loss() {
    let engine = RecordingEngine::default();
    let service = service(engine.clone(), VectorDbConfig::default());
    seed(&service, "images", vec![(1, vec![1.0, 2.0]), (2, vec![2.0, 1.0])]).await;
    service
        .create_index("images", ivfpq("ivfpq1", 2))
        .await
        .unwrap();
    service.train_index("images", "ivfpq1").await.unwrap();

    // Engine restarted without its structures
    engine.delete_index("images", "ivfpq1").await.unwrap();

    assert!(service.reconcile_index("images", "ivfpq1").await.unwrap());
    let index = service.get_index("images", "ivfpq1").await.unwrap();
    assert_eq!(index.state, IndexState::Created);
    assert!(!service.reconcile_index("images", "ivfpq1").await.unwrap());

    let retrained = service.train_index("images", "ivfpq1").await.unwrap();
    assert_eq!(retrained.state, IndexState::Trained);
}

#[tokio::test]
async fn test_list_indexes_and_delete() {
    let service = service(RecordingEngine::default(), VectorDbConfig::default());
    seed(&service, "images", vec![(1, vec![1.0, 2.0])]).await;
    service
        .create_index("images", ivfpq("a", 2))
        .await
        .unwrap();
    service
        .create_index("images", ivfpq("b", 2))
        .await
        .unwrap();

    let names: Vec<String> = service
        .list_indexes("images")
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

    service.delete_index("images", "a").await.unwrap();
    let err = service.delete_index("images", "a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let remaining = service.list_indexes("images").await.unwrap();
    let b = assert_some(remaining.first(), "index b should remain");
    assert_eq!(b.name, "b");
}
