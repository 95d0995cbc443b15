//! Index lifecycle manager
//!
//! The only component that creates, trains or releases engine indexes and
//! persists the resulting state transitions. Writes go to the store first and
//! the engine second.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::codec::VectorPage;
use crate::config::VectorDbConfig;
use crate::engine::{EngineIndexSpec, IndexEngine};
use crate::error::{ErrorKind, VectorDbError, VectorDbResult};
use crate::models::{CreateIndex, Index, IndexState};
use crate::repository::VectorDbRepository;

/// Wrap a non-upstream error raised by the engine so it reports as one
pub(crate) fn engine_failure(err: VectorDbError) -> VectorDbError {
    match err.kind() {
        ErrorKind::UpstreamFailure => err,
        _ => VectorDbError::Engine(err.to_string()),
    }
}

pub(crate) fn engine_spec(index: &Index) -> VectorDbResult<EngineIndexSpec> {
    Ok(EngineIndexSpec {
        dimension: index.dimension(),
        descriptor: index.config.descriptor(),
        metric: index.config.metric_type()?,
        n_probe: index.config.n_probes,
    })
}

pub struct IndexLifecycleManager<R: VectorDbRepository, E: IndexEngine> {
    repository: Arc<R>,
    engine: Arc<E>,
    training_sample_cap: usize,
}

impl<R: VectorDbRepository, E: IndexEngine> Clone for IndexLifecycleManager<R, E> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            engine: Arc::clone(&self.engine),
            training_sample_cap: self.training_sample_cap,
        }
    }
}

impl<R: VectorDbRepository, E: IndexEngine> IndexLifecycleManager<R, E> {
    pub fn new(repository: Arc<R>, engine: Arc<E>, config: &VectorDbConfig) -> Self {
        Self {
            repository,
            engine,
            training_sample_cap: config.training_sample_cap,
        }
    }

    async fn load(&self, db: &str, name: &str) -> VectorDbResult<Index> {
        self.repository
            .find_index(db, name)
            .await?
            .ok_or_else(|| VectorDbError::index_not_found(db, name))
    }

    async fn persist_state(
        &self,
        index: &mut Index,
        state: IndexState,
        size: u64,
    ) -> VectorDbResult<()> {
        self.repository
            .update_index_state(&index.db_name, &index.name, state, size)
            .await?;
        index.state = state;
        index.size = size;
        index.updated_at = Utc::now();
        Ok(())
    }

    /// Validate, persist as CREATED, then create the engine index
    #[instrument(skip(self, input), fields(index = %input.name))]
    pub async fn create_index(&self, db: &str, input: CreateIndex) -> VectorDbResult<Index> {
        input.config.index_type()?;
        input.config.metric_type()?;
        input.validate()?;

        if self.repository.find_database(db).await?.is_none() {
            return Err(VectorDbError::DatabaseNotFound(db.to_string()));
        }

        let index = self.repository.create_index(Index::new(db, input)).await?;
        let spec = engine_spec(&index)?;

        self.engine
            .create_index(db, &index.name, &spec)
            .await
            .map_err(engine_failure)?;

        info!(db, index = %index.name, descriptor = %spec.descriptor, "Index created");
        Ok(index)
    }

    /// Store delete, then engine release regardless of the store outcome
    #[instrument(skip(self))]
    pub async fn delete_index(&self, db: &str, name: &str) -> VectorDbResult<()> {
        let deleted = self.repository.delete_index(db, name).await;

        if let Err(e) = self.engine.delete_index(db, name).await {
            warn!(db, index = name, error = %e, "Failed to release engine index");
        }

        if !deleted? {
            return Err(VectorDbError::index_not_found(db, name));
        }
        info!(db, index = name, "Index deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_index(&self, db: &str, name: &str) -> VectorDbResult<Index> {
        match self.engine.get_index(db, name).await {
            Ok(Some(info)) => debug!(db, index = name, ntotal = info.ntotal, "Engine index present"),
            Ok(None) => warn!(db, index = name, "Engine does not hold the index"),
            Err(e) => warn!(db, index = name, error = %e, "Engine index lookup failed"),
        }
        self.load(db, name).await
    }

    #[instrument(skip(self))]
    pub async fn list_indexes(&self, db: &str) -> VectorDbResult<Vec<Index>> {
        if self.repository.find_database(db).await?.is_none() {
            return Err(VectorDbError::DatabaseNotFound(db.to_string()));
        }
        self.repository.list_indexes(db).await
    }

    /// Train on the first `training_sample_cap` vectors of the database
    #[instrument(skip(self))]
    pub async fn train_index(&self, db: &str, name: &str) -> VectorDbResult<Index> {
        let mut index = self.load(db, name).await?;

        if index.state == IndexState::Failed {
            return Err(VectorDbError::IndexFailed(name.to_string()));
        }
        if !index.state.accepts_training() {
            return Err(VectorDbError::InvalidState {
                index: name.to_string(),
                details: format!("cannot train an index in state {}", index.state),
            });
        }

        let records = self
            .repository
            .find_vectors(db, self.training_sample_cap, 0)
            .await?;
        if records.is_empty() {
            return Err(VectorDbError::EmptyTrainingSet(db.to_string()));
        }
        let page = VectorPage::from_records(&records, index.dimension())?;

        let size = index.size;
        self.persist_state(&mut index, IndexState::Training, size)
            .await?;

        if let Err(e) = self
            .engine
            .train_model(db, name, page.count(), &page.data)
            .await
        {
            warn!(db, index = name, error = %e, "Training failed");
            if let Err(store_err) = self.persist_state(&mut index, IndexState::Failed, size).await {
                warn!(db, index = name, error = %store_err, "Failed to record FAILED state");
            }
            return Err(engine_failure(e));
        }

        self.persist_state(&mut index, IndexState::Trained, size)
            .await?;
        info!(db, index = name, count = page.count(), "Index trained");
        Ok(index)
    }

    /// Re-create the engine index from the stored record if the engine lost it
    ///
    /// A re-created engine index is untrained, so a record past CREATED is
    /// reset to CREATED with size 0. Returns whether a create was issued.
    #[instrument(skip(self))]
    pub async fn reconcile_index(&self, db: &str, name: &str) -> VectorDbResult<bool> {
        let mut index = self.load(db, name).await?;

        if self
            .engine
            .get_index(db, name)
            .await
            .map_err(engine_failure)?
            .is_some()
        {
            debug!(db, index = name, "Engine already holds the index");
            return Ok(false);
        }

        let spec = engine_spec(&index)?;
        self.engine
            .create_index(db, name, &spec)
            .await
            .map_err(engine_failure)?;

        if index.state != IndexState::Created {
            warn!(db, index = name, state = %index.state, "Engine index re-created untrained, resetting state");
            self.persist_state(&mut index, IndexState::Created, 0).await?;
        }
        info!(db, index = name, "Engine index reconciled");
        Ok(true)
    }
}
