use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

use crate::error::{VectorDbError, VectorDbResult};

/// Identifier of a vector, also used as the engine label.
pub type VectorId = i64;

/// A named vector database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of vectors ingested so far
    pub size: u64,
}

impl Database {
    pub fn new(input: CreateDatabase) -> Self {
        let now = Utc::now();
        Self {
            name: input.name,
            created_at: now,
            updated_at: now,
            size: 0,
        }
    }
}

/// Input for creating a database
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateDatabase {
    #[validate(length(min = 1, max = 255, message = "Database name must be 1-255 characters"))]
    pub name: String,
}

/// Supported ANN index families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum IndexType {
    /// Inverted file with product quantization
    Ivfpq,
}

/// Distance function used to rank neighbors
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
pub enum MetricType {
    #[serde(rename = "METRIC_L1")]
    #[strum(serialize = "METRIC_L1")]
    L1,
    #[default]
    #[serde(rename = "METRIC_L2")]
    #[strum(serialize = "METRIC_L2")]
    L2,
}

/// Readiness of an index
///
/// `CREATED -> TRAINING -> TRAINED -> INDEXING -> READY`, with `FAILED`
/// reachable on an engine error while training or encoding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexState {
    #[default]
    Created,
    Training,
    Trained,
    Indexing,
    Ready,
    Failed,
}

impl IndexState {
    /// Whether the engine has a trained structure to answer queries from
    pub fn is_searchable(&self) -> bool {
        matches!(
            self,
            IndexState::Trained | IndexState::Indexing | IndexState::Ready
        )
    }

    /// Whether a training run may start from this state
    pub fn accepts_training(&self) -> bool {
        matches!(
            self,
            IndexState::Created | IndexState::Training | IndexState::Trained
        )
    }
}

/// Index configuration as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct IndexConfig {
    pub index_type: String,
    #[validate(range(min = 1, message = "dimension must be positive"))]
    pub dimension: u32,
    #[validate(range(min = 1, message = "n_list must be positive"))]
    pub n_list: u32,
    #[validate(range(min = 1, message = "n_probes must be positive"))]
    pub n_probes: u32,
    #[serde(default = "default_metric")]
    pub metric: String,
}

fn default_metric() -> String {
    MetricType::L2.to_string()
}

impl IndexConfig {
    pub fn new(dimension: u32, n_list: u32, n_probes: u32) -> Self {
        Self {
            index_type: IndexType::Ivfpq.to_string(),
            dimension,
            n_list,
            n_probes,
            metric: default_metric(),
        }
    }

    pub fn with_metric(mut self, metric: MetricType) -> Self {
        self.metric = metric.to_string();
        self
    }

    pub fn index_type(&self) -> VectorDbResult<IndexType> {
        self.index_type.parse().map_err(|_| {
            VectorDbError::InvalidConfig(format!(
                "Can't create index because of unknown index type {}",
                self.index_type
            ))
        })
    }

    pub fn metric_type(&self) -> VectorDbResult<MetricType> {
        self.metric.parse().map_err(|_| {
            VectorDbError::InvalidConfig(format!("Unsupported metric {}", self.metric))
        })
    }

    /// Engine factory descriptor for this configuration
    pub fn descriptor(&self) -> String {
        format!("IVF{},PQ{}np", self.n_list, self.n_probes)
    }
}

/// An ANN index over the vectors of one database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub db_name: String,
    pub name: String,
    pub config: IndexConfig,
    /// Number of vectors encoded so far
    pub size: u64,
    pub state: IndexState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Index {
    pub fn new(db_name: &str, input: CreateIndex) -> Self {
        let now = Utc::now();
        Self {
            db_name: db_name.to_string(),
            name: input.name,
            config: input.config,
            size: 0,
            state: IndexState::Created,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension as usize
    }
}

/// Input for creating an index
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateIndex {
    #[validate(length(min = 1, max = 255, message = "Index name must be 1-255 characters"))]
    pub name: String,
    #[validate(nested)]
    pub config: IndexConfig,
}

/// A vector as exchanged with callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub id: VectorId,
    pub data: Vec<f32>,
}

impl Vector {
    pub fn new(id: VectorId, data: Vec<f32>) -> Self {
        Self { id, data }
    }
}

/// A vector as persisted: payload is `4 * dimension` packed bytes
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub db: String,
    pub id: VectorId,
    pub data: Vec<u8>,
}
