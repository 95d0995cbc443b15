use http::StatusCode;
use thiserror::Error;

/// Stable classification of a failure, independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    NotFound,
    InvalidConfig,
    Unsupported,
    Precondition,
    UpstreamFailure,
}

#[derive(Debug, Error)]
pub enum VectorDbError {
    #[error("Database name {0} already exists")]
    DatabaseExists(String),

    #[error("Index name {index} already exists in database {db}")]
    IndexExists { db: String, index: String },

    #[error("Vector {id} already exists in database {db}")]
    VectorExists { db: String, id: i64 },

    #[error("Database {0} not found")]
    DatabaseNotFound(String),

    #[error("Index {index} not found in database {db}")]
    IndexNotFound { db: String, index: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Searching in all indices is not supported yet, please provide an index name")]
    CrossIndexSearch,

    #[error("Index {index} is not searchable in state {state}")]
    IndexNotReady { index: String, state: String },

    #[error("Index {index} must be trained before encoding (state {state})")]
    IndexNotTrained { index: String, state: String },

    #[error("Index {0} is in FAILED state; delete and recreate it")]
    IndexFailed(String),

    #[error("Invalid state transition for index {index}: {details}")]
    InvalidState { index: String, details: String },

    #[error("No vectors available in database {0} to train on")]
    EmptyTrainingSet(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Can't write to the store: {0}")]
    StoreWrite(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Error while deleting vectors associated with database {0}")]
    PartialDelete(String),
}

pub type VectorDbResult<T> = Result<T, VectorDbError>;

impl VectorDbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VectorDbError::DatabaseExists(_)
            | VectorDbError::IndexExists { .. }
            | VectorDbError::VectorExists { .. } => ErrorKind::Conflict,
            VectorDbError::DatabaseNotFound(_) | VectorDbError::IndexNotFound { .. } => {
                ErrorKind::NotFound
            }
            VectorDbError::InvalidConfig(_)
            | VectorDbError::DimensionMismatch { .. }
            | VectorDbError::Codec(_) => ErrorKind::InvalidConfig,
            VectorDbError::CrossIndexSearch | VectorDbError::IndexNotReady { .. } => {
                ErrorKind::Unsupported
            }
            VectorDbError::IndexNotTrained { .. }
            | VectorDbError::IndexFailed(_)
            | VectorDbError::InvalidState { .. }
            | VectorDbError::EmptyTrainingSet(_) => ErrorKind::Precondition,
            VectorDbError::Store(_)
            | VectorDbError::StoreWrite(_)
            | VectorDbError::Engine(_)
            | VectorDbError::PartialDelete(_) => ErrorKind::UpstreamFailure,
        }
    }

    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            VectorDbError::EmptyTrainingSet(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => match self.kind() {
                ErrorKind::Conflict | ErrorKind::Precondition => StatusCode::CONFLICT,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidConfig => StatusCode::BAD_REQUEST,
                ErrorKind::Unsupported => StatusCode::NOT_IMPLEMENTED,
                ErrorKind::UpstreamFailure => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub(crate) fn index_not_found(db: &str, index: &str) -> Self {
        VectorDbError::IndexNotFound {
            db: db.to_string(),
            index: index.to_string(),
        }
    }
}

impl From<mongodb::error::Error> for VectorDbError {
    fn from(err: mongodb::error::Error) -> Self {
        VectorDbError::Store(err.to_string())
    }
}

impl From<redis::RedisError> for VectorDbError {
    fn from(err: redis::RedisError) -> Self {
        VectorDbError::Engine(err.to_string())
    }
}

impl From<validator::ValidationErrors> for VectorDbError {
    fn from(err: validator::ValidationErrors) -> Self {
        VectorDbError::InvalidConfig(err.to_string())
    }
}
