mod engine;
mod metadata;
mod object;

pub use engine::{Blob, BlobStore};
pub use metadata::{MetadataRegistry, SledMetadataRegistry};
pub use object::{AvailableSpace, NodeId, ObjectId, PartName, PlacementRecord};

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid blob name: {0:?}")]
    InvalidName(String),

    #[error("Body stream failed: {0}")]
    Body(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
