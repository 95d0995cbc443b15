//! MongoDB implementation of VectorDbRepository

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, spec::BinarySubtype, Binary},
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions, IndexOptions},
    Client, Collection, Database as MongoDatabase, IndexModel,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::MongoStoreConfig;
use crate::error::{VectorDbError, VectorDbResult};
use crate::models::{Database, Index, IndexState, VectorId, VectorRecord};
use crate::repository::VectorDbRepository;

const DUPLICATE_KEY: i32 = 11000;

/// Stored form of a vector; `_id` is generated by the server and gives the
/// insertion order used for pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    oid: Option<ObjectId>,
    db: String,
    id: VectorId,
    data: Binary,
}

impl From<VectorRecord> for VectorDocument {
    fn from(record: VectorRecord) -> Self {
        Self {
            oid: None,
            db: record.db,
            id: record.id,
            data: Binary {
                subtype: BinarySubtype::Generic,
                bytes: record.data,
            },
        }
    }
}

impl From<VectorDocument> for VectorRecord {
    fn from(doc: VectorDocument) -> Self {
        Self {
            db: doc.db,
            id: doc.id,
            data: doc.data.bytes,
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::InsertMany(e) => e
            .write_errors
            .as_ref()
            .is_some_and(|errors| errors.iter().any(|w| w.code == DUPLICATE_KEY)),
        _ => false,
    }
}

/// Position in the batch of the first duplicate-key write error
fn duplicate_position(err: &mongodb::error::Error) -> Option<usize> {
    match err.kind.as_ref() {
        ErrorKind::InsertMany(e) => e
            .write_errors
            .as_ref()?
            .iter()
            .find(|w| w.code == DUPLICATE_KEY)
            .map(|w| w.index),
        _ => None,
    }
}

/// First record whose `(db, id)` already appeared earlier in the batch
fn first_repeated(records: &[VectorRecord]) -> Option<&VectorRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .iter()
        .find(|r| !seen.insert((r.db.as_str(), r.id)))
}

/// MongoDB implementation of the VectorDbRepository
pub struct MongoVectorDbRepository {
    databases: Collection<Database>,
    indexes: Collection<Index>,
    vectors: Collection<VectorDocument>,
}

impl MongoVectorDbRepository {
    pub fn new(db: &MongoDatabase) -> Self {
        Self {
            databases: db.collection::<Database>("databases"),
            indexes: db.collection::<Index>("indexes"),
            vectors: db.collection::<VectorDocument>("vectors"),
        }
    }

    /// Connect using a MongoStoreConfig and create the unique indexes
    pub async fn connect(config: &MongoStoreConfig) -> VectorDbResult<Self> {
        info!("Attempting to connect to MongoDB at {}", config.url);

        let mut options = ClientOptions::parse(&config.url).await?;
        options.max_pool_size = Some(config.max_pool_size);
        options.min_pool_size = Some(config.min_pool_size);
        options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        options.server_selection_timeout =
            Some(Duration::from_secs(config.server_selection_timeout_secs));
        if let Some(ref app_name) = config.app_name {
            options.app_name = Some(app_name.clone());
        }

        let client = Client::with_options(options)?;
        client
            .list_database_names()
            .await
            .map_err(|e| VectorDbError::Store(format!("Connection failed: {}", e)))?;
        info!("Successfully connected to MongoDB");

        let repository = Self::new(&client.database(&config.database));
        repository.init_indexes().await?;
        Ok(repository)
    }

    /// Create the unique keys the duplicate checks rely on
    pub async fn init_indexes(&self) -> VectorDbResult<()> {
        self.databases
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("idx_database_name_unique".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await?;

        self.indexes
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "db_name": 1, "name": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("idx_index_db_name_unique".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await?;

        self.vectors
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "db": 1, "id": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("idx_vector_db_id_unique".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await?;

        info!("Vector store indexes created successfully");
        Ok(())
    }
}

#[async_trait]
impl VectorDbRepository for MongoVectorDbRepository {
    #[instrument(skip(self))]
    async fn list_databases(&self) -> VectorDbResult<Vec<Database>> {
        let cursor = self.databases.find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self, database), fields(db = %database.name))]
    async fn create_database(&self, database: Database) -> VectorDbResult<Database> {
        match self.databases.insert_one(&database).await {
            Ok(_) => Ok(database),
            Err(e) if is_duplicate_key(&e) => Err(VectorDbError::DatabaseExists(database.name)),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn find_database(&self, name: &str) -> VectorDbResult<Option<Database>> {
        Ok(self.databases.find_one(doc! { "name": name }).await?)
    }

    #[instrument(skip(self))]
    async fn delete_database(&self, name: &str) -> VectorDbResult<bool> {
        let result = self.databases.delete_one(doc! { "name": name }).await?;
        Ok(result.deleted_count > 0)
    }

    #[instrument(skip(self))]
    async fn increment_database_size(&self, name: &str, delta: u64) -> VectorDbResult<()> {
        self.databases
            .update_one(
                doc! { "name": name },
                doc! {
                    "$inc": { "size": delta as i64 },
                    "$set": { "updated_at": Utc::now().to_rfc3339() }
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_vectors(&self, db: &str) -> VectorDbResult<bool> {
        let result = self.vectors.delete_many(doc! { "db": db }).await?;
        info!(db, deleted = result.deleted_count, "Vectors deleted");
        Ok(true)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn get_vectors(&self, db: &str, ids: Vec<VectorId>) -> VectorDbResult<Vec<VectorRecord>> {
        let cursor = self
            .vectors
            .find(doc! { "db": db, "id": { "$in": ids } })
            .await?;
        let documents: Vec<VectorDocument> = cursor.try_collect().await?;
        Ok(documents.into_iter().map(VectorRecord::from).collect())
    }

    /// Rejects the batch before writing when any id is repeated in it or
    /// already stored
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn create_vectors(&self, records: Vec<VectorRecord>) -> VectorDbResult<bool> {
        if records.is_empty() {
            return Ok(true);
        }
        if let Some(repeated) = first_repeated(&records) {
            return Err(VectorDbError::VectorExists {
                db: repeated.db.clone(),
                id: repeated.id,
            });
        }

        let mut ids_by_db: HashMap<&str, Vec<VectorId>> = HashMap::new();
        for record in &records {
            ids_by_db.entry(record.db.as_str()).or_default().push(record.id);
        }
        for (db, ids) in ids_by_db {
            if let Some(existing) = self
                .vectors
                .find_one(doc! { "db": db, "id": { "$in": ids } })
                .await?
            {
                return Err(VectorDbError::VectorExists {
                    db: existing.db,
                    id: existing.id,
                });
            }
        }

        let keys: Vec<(String, VectorId)> =
            records.iter().map(|r| (r.db.clone(), r.id)).collect();
        let documents: Vec<VectorDocument> = records.into_iter().map(Into::into).collect();

        match self.vectors.insert_many(documents).await {
            Ok(result) => Ok(!result.inserted_ids.is_empty()),
            // A concurrent writer got past the check above; the unique index still holds
            Err(e) if is_duplicate_key(&e) => {
                let (db, id) = duplicate_position(&e)
                    .and_then(|i| keys.get(i))
                    .or_else(|| keys.first())
                    .cloned()
                    .unwrap_or_default();
                Err(VectorDbError::VectorExists { db, id })
            }
            Err(e) => Err(VectorDbError::StoreWrite(e.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn find_vectors(
        &self,
        db: &str,
        limit: usize,
        skip: u64,
    ) -> VectorDbResult<Vec<VectorRecord>> {
        let options = FindOptions::builder()
            .sort(doc! { "_id": 1 })
            .skip(skip)
            .limit(limit as i64)
            .build();

        let cursor = self
            .vectors
            .find(doc! { "db": db })
            .with_options(options)
            .await?;
        let documents: Vec<VectorDocument> = cursor.try_collect().await?;
        Ok(documents.into_iter().map(VectorRecord::from).collect())
    }

    #[instrument(skip(self, index), fields(db = %index.db_name, index = %index.name))]
    async fn create_index(&self, index: Index) -> VectorDbResult<Index> {
        match self.indexes.insert_one(&index).await {
            Ok(_) => Ok(index),
            Err(e) if is_duplicate_key(&e) => Err(VectorDbError::IndexExists {
                db: index.db_name,
                index: index.name,
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete_index(&self, db: &str, name: &str) -> VectorDbResult<bool> {
        let result = self
            .indexes
            .delete_one(doc! { "db_name": db, "name": name })
            .await?;
        Ok(result.deleted_count > 0)
    }

    #[instrument(skip(self))]
    async fn find_index(&self, db: &str, name: &str) -> VectorDbResult<Option<Index>> {
        Ok(self
            .indexes
            .find_one(doc! { "db_name": db, "name": name })
            .await?)
    }

    #[instrument(skip(self))]
    async fn list_indexes(&self, db: &str) -> VectorDbResult<Vec<Index>> {
        let cursor = self.indexes.find(doc! { "db_name": db }).await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self))]
    async fn update_index_state(
        &self,
        db: &str,
        name: &str,
        state: IndexState,
        size: u64,
    ) -> VectorDbResult<bool> {
        let result = self
            .indexes
            .update_one(
                doc! { "db_name": db, "name": name },
                doc! {
                    "$set": {
                        "state": state.to_string(),
                        "size": size as i64,
                        "updated_at": Utc::now().to_rfc3339(),
                    }
                },
            )
            .await?;
        Ok(result.matched_count > 0)
    }
}
