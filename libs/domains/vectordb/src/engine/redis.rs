//! Engine whose index structures live in Redis
//!
//! Layout per index:
//! - `{prefix}:{len(db)}:{db}:{index}:meta` hash: `dimension`, `descriptor`,
//!   `metric`, `n_probe`, `trained`
//! - `{prefix}:{len(db)}:{db}:{index}:vectors` hash: vector id -> packed
//!   float32 bytes
//!
//! The database name is length-prefixed so names containing `:` never map two
//! `(db, index)` pairs onto the same keys.
//!
//! Searches load the encoded vectors and run an exact scan.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::codec;
use crate::config::EngineConfig;
use crate::engine::{EngineIndexInfo, EngineIndexSpec, IndexEngine, QueryMatrix, SearchResponse, flat};
use crate::error::{VectorDbError, VectorDbResult};
use crate::models::{MetricType, VectorId};

pub struct RedisEngine {
    config: EngineConfig,
    connection: RwLock<Option<ConnectionManager>>,
}

impl RedisEngine {
    /// Connect, retrying up to `max_reconnects` times `reconnect_interval` apart
    pub async fn connect(config: EngineConfig) -> VectorDbResult<Self> {
        let url = config.url();
        info!("Attempting to connect to the index engine at {}", url);

        let mut attempt = 0;
        let manager = loop {
            match Self::open(&config).await {
                Ok(manager) => break manager,
                Err(e) => {
                    attempt += 1;
                    if attempt > config.max_reconnects {
                        warn!("Engine connection failed after {} attempts: {}", attempt, e);
                        return Err(e);
                    }
                    debug!(
                        "Engine connection failed (attempt {}/{}): {}. Retrying in {}ms...",
                        attempt, config.max_reconnects, e, config.reconnect_interval_ms
                    );
                    tokio::time::sleep(config.reconnect_interval()).await;
                }
            }
        };

        info!("Successfully connected to the index engine");
        Ok(Self {
            config,
            connection: RwLock::new(Some(manager)),
        })
    }

    async fn open(config: &EngineConfig) -> VectorDbResult<ConnectionManager> {
        let client = Client::open(config.url())?;
        let mut manager = bounded(config, "connect", ConnectionManager::new(client)).await?;
        let _: String = bounded(config, "PING", redis::cmd("PING").query_async(&mut manager)).await?;
        Ok(manager)
    }

    async fn connection(&self) -> VectorDbResult<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| VectorDbError::Engine("engine connection is closed".to_string()))
    }

    fn meta_key(&self, db: &str, index: &str) -> String {
        index_key(&self.config.key_prefix, db, index, "meta")
    }

    fn vectors_key(&self, db: &str, index: &str) -> String {
        index_key(&self.config.key_prefix, db, index, "vectors")
    }

    async fn load_meta(&self, db: &str, index: &str) -> VectorDbResult<Option<StoredMeta>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = bounded(
            &self.config,
            "HGETALL",
            conn.hgetall(self.meta_key(db, index)),
        )
        .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        StoredMeta::parse(&fields).map(Some)
    }

    async fn require_meta(&self, db: &str, index: &str) -> VectorDbResult<StoredMeta> {
        self.load_meta(db, index)
            .await?
            .ok_or_else(|| VectorDbError::Engine(format!("index {db}/{index} is not loaded")))
    }
}

fn index_key(prefix: &str, db: &str, index: &str, kind: &str) -> String {
    format!("{}:{}:{}:{}:{}", prefix, db.len(), db, index, kind)
}

/// Bound a Redis call by the configured timeout
async fn bounded<T>(
    config: &EngineConfig,
    op: &str,
    fut: impl Future<Output = RedisResult<T>>,
) -> VectorDbResult<T> {
    match tokio::time::timeout(config.timeout(), fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(VectorDbError::Engine(format!(
            "{} timed out after {}ms",
            op, config.timeout_ms
        ))),
    }
}

#[derive(Debug, Clone)]
struct StoredMeta {
    spec: EngineIndexSpec,
    trained: bool,
}

impl StoredMeta {
    fn fields(spec: &EngineIndexSpec) -> Vec<(&'static str, String)> {
        vec![
            ("dimension", spec.dimension.to_string()),
            ("descriptor", spec.descriptor.clone()),
            ("metric", spec.metric.to_string()),
            ("n_probe", spec.n_probe.to_string()),
            ("trained", "0".to_string()),
        ]
    }

    fn parse(fields: &HashMap<String, String>) -> VectorDbResult<Self> {
        let get = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| VectorDbError::Engine(format!("index metadata is missing {name}")))
        };
        let corrupt = |name: &str| VectorDbError::Engine(format!("index metadata has a bad {name}"));

        Ok(Self {
            spec: EngineIndexSpec {
                dimension: get("dimension")?.parse().map_err(|_| corrupt("dimension"))?,
                descriptor: get("descriptor")?.clone(),
                metric: get("metric")?
                    .parse::<MetricType>()
                    .map_err(|_| corrupt("metric"))?,
                n_probe: get("n_probe")?.parse().map_err(|_| corrupt("n_probe"))?,
            },
            trained: get("trained")? == "1",
        })
    }
}

#[async_trait]
impl IndexEngine for RedisEngine {
    #[instrument(skip(self, spec))]
    async fn create_index(
        &self,
        db: &str,
        index: &str,
        spec: &EngineIndexSpec,
    ) -> VectorDbResult<()> {
        if self.load_meta(db, index).await?.is_some() {
            debug!(db, index, "Engine index already exists");
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let _: () = bounded(
            &self.config,
            "HSET",
            conn.hset_multiple(self.meta_key(db, index), &StoredMeta::fields(spec)),
        )
        .await?;
        info!(db, index, descriptor = %spec.descriptor, "Engine index created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_index(&self, db: &str, index: &str) -> VectorDbResult<()> {
        let mut conn = self.connection().await?;
        let _: () = bounded(
            &self.config,
            "DEL",
            conn.del(vec![self.meta_key(db, index), self.vectors_key(db, index)]),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_index(&self, db: &str, index: &str) -> VectorDbResult<Option<EngineIndexInfo>> {
        let Some(meta) = self.load_meta(db, index).await? else {
            return Ok(None);
        };

        let mut conn = self.connection().await?;
        let ntotal: u64 = bounded(&self.config, "HLEN", conn.hlen(self.vectors_key(db, index))).await?;

        Ok(Some(EngineIndexInfo {
            dimension: meta.spec.dimension,
            descriptor: meta.spec.descriptor,
            metric: meta.spec.metric,
            n_probe: meta.spec.n_probe,
            trained: meta.trained,
            ntotal,
        }))
    }

    #[instrument(skip(self, vectors))]
    async fn train_model(
        &self,
        db: &str,
        index: &str,
        count: usize,
        vectors: &[f32],
    ) -> VectorDbResult<()> {
        let meta = self.require_meta(db, index).await?;
        flat::check_rows(count, vectors, meta.spec.dimension)?;
        if count == 0 {
            return Err(VectorDbError::Engine("cannot train on zero vectors".to_string()));
        }

        let mut conn = self.connection().await?;
        let _: () = bounded(
            &self.config,
            "HSET",
            conn.hset(self.meta_key(db, index), "trained", "1"),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, vectors, ids))]
    async fn encode_vectors(
        &self,
        db: &str,
        index: &str,
        count: usize,
        vectors: &[f32],
        ids: &[VectorId],
    ) -> VectorDbResult<()> {
        let meta = self.require_meta(db, index).await?;
        if !meta.trained {
            return Err(VectorDbError::Engine(format!(
                "index {db}/{index} must be trained before adding vectors"
            )));
        }
        flat::check_rows(count, vectors, meta.spec.dimension)?;
        if ids.len() != count {
            return Err(VectorDbError::Engine(format!(
                "{} ids for {} vectors",
                ids.len(),
                count
            )));
        }
        if count == 0 {
            return Ok(());
        }

        let items: Vec<(VectorId, Vec<u8>)> = vectors
            .chunks_exact(meta.spec.dimension)
            .zip(ids)
            .map(|(row, &id)| (id, codec::encode(row)))
            .collect();

        let mut conn = self.connection().await?;
        let _: () = bounded(
            &self.config,
            "HSET",
            conn.hset_multiple(self.vectors_key(db, index), &items),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, queries), fields(rows = queries.rows))]
    async fn search_vectors(
        &self,
        db: &str,
        index: &str,
        queries: &QueryMatrix,
        k: u32,
        _n_probe: u32,
    ) -> VectorDbResult<SearchResponse> {
        let meta = self.require_meta(db, index).await?;

        let mut conn = self.connection().await?;
        let stored: HashMap<VectorId, Vec<u8>> = bounded(
            &self.config,
            "HGETALL",
            conn.hgetall(self.vectors_key(db, index)),
        )
        .await?;

        let mut entries: Vec<(VectorId, Vec<u8>)> = stored.into_iter().collect();
        entries.sort_unstable_by_key(|(id, _)| *id);

        let mut ids = Vec::with_capacity(entries.len());
        let mut data = Vec::with_capacity(entries.len() * meta.spec.dimension);
        for (id, bytes) in &entries {
            codec::decode_into(bytes, &mut data)?;
            ids.push(*id);
        }
        flat::check_rows(ids.len(), &data, meta.spec.dimension)?;

        flat::search(
            meta.spec.metric,
            &data,
            &ids,
            meta.spec.dimension,
            queries,
            k as usize,
        )
    }

    async fn close(&self) -> VectorDbResult<()> {
        if self.connection.write().await.take().is_some() {
            info!("Index engine connection closed");
        }
        Ok(())
    }
}
