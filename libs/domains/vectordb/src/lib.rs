//! Vector Database Domain Library
//!
//! Orchestrates named vector databases and the ANN indexes built over them.
//! Metadata and raw vectors live in a document store; index structures live
//! in a separate engine. Both fail independently, so every operation writes
//! the store first and records engine failures as a `FAILED` index state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               VectorDbService                │
//! └──────┬──────────────┬──────────────┬─────────┘
//!        │              │              │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌─────▼──────────┐
//! │  Lifecycle  │ │ Reindexer  │ │ QueryDispatcher│
//! └──────┬──────┘ └─────┬──────┘ └─────┬──────────┘
//!        │              │              │
//! ┌──────▼──────────────▼──┐   ┌───────▼─────────┐
//! │ VectorDbRepository     │   │   IndexEngine   │
//! │ (Mongo / in-memory)    │   │ (Redis / memory)│
//! └────────────────────────┘   └─────────────────┘
//! ```
//!
//! # Index states
//!
//! `CREATED -> TRAINING -> TRAINED -> INDEXING -> READY`; `FAILED` when the
//! engine errors during training or encoding. Only TRAINED, INDEXING and READY
//! indexes answer searches.
//!
//! # Usage
//!
//! ```rust,no_run
//! use core_config::FromEnv;
//! use domain_vectordb::{
//!     CreateDatabase, CreateIndex, EngineConfig, IndexConfig, MongoStoreConfig,
//!     MongoVectorDbRepository, RedisEngine, Vector, VectorDbConfig, VectorDbService,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = MongoVectorDbRepository::connect(&MongoStoreConfig::from_env()?).await?;
//! let engine = RedisEngine::connect(EngineConfig::from_env()?).await?;
//! let service = VectorDbService::new(repository, engine, VectorDbConfig::from_env()?);
//!
//! service.create_database(CreateDatabase { name: "images".into() }).await?;
//! service
//!     .put_vectors("images", vec![Vector::new(1, vec![0.1, 0.2, 0.3, 0.4])])
//!     .await?;
//! service
//!     .create_index(
//!         "images",
//!         CreateIndex { name: "ivfpq1".into(), config: IndexConfig::new(4, 256, 16) },
//!     )
//!     .await?;
//! service.train_index("images", "ivfpq1").await?;
//! service.reindex("images", "ivfpq1").await?;
//!
//! let hits = service
//!     .search("images", Some("ivfpq1"), &[vec![0.1, 0.2, 0.3, 0.4]], Some(10), None)
//!     .await?;
//! # let _ = hits;
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod mongodb;
pub mod query;
pub mod reindexer;
pub mod repository;
pub mod service;

pub use config::{EngineConfig, MongoStoreConfig, VectorDbConfig};
pub use engine::{
    EngineIndexInfo, EngineIndexSpec, InMemoryEngine, IndexEngine, QueryMatrix, RedisEngine,
    SearchHit, SearchResponse,
};
pub use error::{ErrorKind, VectorDbError, VectorDbResult};
pub use lifecycle::IndexLifecycleManager;
pub use models::{
    CreateDatabase, CreateIndex, Database, Index, IndexConfig, IndexState, IndexType, MetricType,
    Vector, VectorId, VectorRecord,
};
pub use self::mongodb::MongoVectorDbRepository;
pub use query::QueryDispatcher;
pub use reindexer::{BatchReindexer, ReindexReport};
pub use repository::{InMemoryVectorDbRepository, VectorDbRepository};
pub use service::VectorDbService;
