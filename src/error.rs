use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShardStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Network error: {0}")]
    Network(#[from] network::NetworkError),

    #[error("Server error: {0}")]
    Api(#[from] api::ApiError),

    #[error("System error: {0}")]
    System(#[from] system::SystemError),
}

pub type Result<T> = std::result::Result<T, ShardStoreError>;
