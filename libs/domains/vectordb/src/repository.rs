use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{VectorDbError, VectorDbResult};
use crate::models::{Database, Index, IndexState, VectorId, VectorRecord};

/// Repository trait for databases, indexes and raw vectors
///
/// Duplicate keys surface as the matching `*Exists` error; absence is
/// reported through `Option`/`bool` so callers decide what is an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorDbRepository: Send + Sync {
    // ===== Databases =====

    async fn list_databases(&self) -> VectorDbResult<Vec<Database>>;

    /// Fails with `DatabaseExists` on a duplicate name
    async fn create_database(&self, database: Database) -> VectorDbResult<Database>;

    async fn find_database(&self, name: &str) -> VectorDbResult<Option<Database>>;

    /// Returns whether a record was removed
    async fn delete_database(&self, name: &str) -> VectorDbResult<bool>;

    async fn increment_database_size(&self, name: &str, delta: u64) -> VectorDbResult<()>;

    // ===== Vectors =====

    /// Returns whether the store acknowledged the deletion
    async fn delete_vectors(&self, db: &str) -> VectorDbResult<bool>;

    async fn get_vectors(&self, db: &str, ids: Vec<VectorId>) -> VectorDbResult<Vec<VectorRecord>>;

    /// Fails with `VectorExists` when an id is already stored for the database
    async fn create_vectors(&self, records: Vec<VectorRecord>) -> VectorDbResult<bool>;

    /// Page of vectors in insertion order
    async fn find_vectors(
        &self,
        db: &str,
        limit: usize,
        skip: u64,
    ) -> VectorDbResult<Vec<VectorRecord>>;

    // ===== Indexes =====

    /// Fails with `IndexExists` on a duplicate (database, name) pair
    async fn create_index(&self, index: Index) -> VectorDbResult<Index>;

    async fn delete_index(&self, db: &str, name: &str) -> VectorDbResult<bool>;

    async fn find_index(&self, db: &str, name: &str) -> VectorDbResult<Option<Index>>;

    async fn list_indexes(&self, db: &str) -> VectorDbResult<Vec<Index>>;

    /// Returns whether a record was updated
    async fn update_index_state(
        &self,
        db: &str,
        name: &str,
        state: IndexState,
        size: u64,
    ) -> VectorDbResult<bool>;
}

#[derive(Debug, Default)]
struct Tables {
    databases: Vec<Database>,
    indexes: Vec<Index>,
    /// Per database, in insertion order
    vectors: HashMap<String, Vec<VectorRecord>>,
}

/// In-memory implementation of VectorDbRepository (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryVectorDbRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryVectorDbRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorDbRepository for InMemoryVectorDbRepository {
    async fn list_databases(&self) -> VectorDbResult<Vec<Database>> {
        Ok(self.tables.read().await.databases.clone())
    }

    async fn create_database(&self, database: Database) -> VectorDbResult<Database> {
        let mut tables = self.tables.write().await;
        if tables.databases.iter().any(|d| d.name == database.name) {
            return Err(VectorDbError::DatabaseExists(database.name));
        }
        tables.databases.push(database.clone());
        Ok(database)
    }

    async fn find_database(&self, name: &str) -> VectorDbResult<Option<Database>> {
        let tables = self.tables.read().await;
        Ok(tables.databases.iter().find(|d| d.name == name).cloned())
    }

    async fn delete_database(&self, name: &str) -> VectorDbResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.databases.len();
        tables.databases.retain(|d| d.name != name);
        Ok(tables.databases.len() != before)
    }

    async fn increment_database_size(&self, name: &str, delta: u64) -> VectorDbResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(database) = tables.databases.iter_mut().find(|d| d.name == name) {
            database.size += delta;
            database.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_vectors(&self, db: &str) -> VectorDbResult<bool> {
        self.tables.write().await.vectors.remove(db);
        Ok(true)
    }

    async fn get_vectors(&self, db: &str, ids: Vec<VectorId>) -> VectorDbResult<Vec<VectorRecord>> {
        let tables = self.tables.read().await;
        let Some(records) = tables.vectors.get(db) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn create_vectors(&self, records: Vec<VectorRecord>) -> VectorDbResult<bool> {
        let mut tables = self.tables.write().await;

        for (i, record) in records.iter().enumerate() {
            let stored = tables
                .vectors
                .get(&record.db)
                .is_some_and(|existing| existing.iter().any(|r| r.id == record.id));
            let repeated = records[..i]
                .iter()
                .any(|r| r.db == record.db && r.id == record.id);
            if stored || repeated {
                return Err(VectorDbError::VectorExists {
                    db: record.db.clone(),
                    id: record.id,
                });
            }
        }

        for record in records {
            tables
                .vectors
                .entry(record.db.clone())
                .or_default()
                .push(record);
        }
        Ok(true)
    }

    async fn find_vectors(
        &self,
        db: &str,
        limit: usize,
        skip: u64,
    ) -> VectorDbResult<Vec<VectorRecord>> {
        let tables = self.tables.read().await;
        let Some(records) = tables.vectors.get(db) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .skip(skip as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_index(&self, index: Index) -> VectorDbResult<Index> {
        let mut tables = self.tables.write().await;
        if tables
            .indexes
            .iter()
            .any(|i| i.db_name == index.db_name && i.name == index.name)
        {
            return Err(VectorDbError::IndexExists {
                db: index.db_name,
                index: index.name,
            });
        }
        tables.indexes.push(index.clone());
        Ok(index)
    }

    async fn delete_index(&self, db: &str, name: &str) -> VectorDbResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.indexes.len();
        tables
            .indexes
            .retain(|i| !(i.db_name == db && i.name == name));
        Ok(tables.indexes.len() != before)
    }

    async fn find_index(&self, db: &str, name: &str) -> VectorDbResult<Option<Index>> {
        let tables = self.tables.read().await;
        Ok(tables
            .indexes
            .iter()
            .find(|i| i.db_name == db && i.name == name)
            .cloned())
    }

    async fn list_indexes(&self, db: &str) -> VectorDbResult<Vec<Index>> {
        let tables = self.tables.read().await;
        Ok(tables
            .indexes
            .iter()
            .filter(|i| i.db_name == db)
            .cloned()
            .collect())
    }

    async fn update_index_state(
        &self,
        db: &str,
        name: &str,
        state: IndexState,
        size: u64,
    ) -> VectorDbResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(index) = tables
            .indexes
            .iter_mut()
            .find(|i| i.db_name == db && i.name == name)
        else {
            return Ok(false);
        };
        index.state = state;
        index.size = size;
        index.updated_at = Utc::now();
        Ok(true)
    }
}
