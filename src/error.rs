use thiserror::Error;

use crate::identity::ServiceError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("migration to version {version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("identity service error: {0}")]
    Service(#[from] ServiceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("blob error: {0}")]
    Blob(#[from] crate::blob::BlobError),

    #[error("discussion {0} is locked")]
    DiscussionLocked(i64),
}

pub type Result<T> = std::result::Result<T, Error>;
