mod client;
mod front;
mod registry;

pub use client::{parse_base_url, ClientConfig, HttpNodeClient};
pub use front::FrontClient;
pub use registry::{NodeState, PlacementRegistry};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::time::Duration;
use storage::{AvailableSpace, PartName};

/// Bytes of one part in flight, in either direction.
pub type PartStream = BoxStream<'static, Result<Bytes>>;

/// Everything the front needs from one storage node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Stable identifier, equal to the node's configured address.
    fn id(&self) -> &str;

    /// Stores `body` as blob `part`. Returns once the node has made it durable.
    async fn upload(&self, part: &PartName, body: PartStream) -> Result<()>;

    async fn download(&self, part: &PartName) -> Result<PartStream>;

    async fn space_report(&self) -> Result<AvailableSpace>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub refresh_interval: Duration,
    /// Deadline for one node's space poll. Kept below `refresh_interval`.
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(3),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{peer} answered {status}: {message}")]
    Status {
        peer: String,
        status: u16,
        message: String,
    },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("All storage nodes are offline")]
    AllNodesOffline,

    #[error("Storage node {0} is offline")]
    NodeUnavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid address {0:?}")]
    InvalidAddress(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Body stream failed: {0}")]
    Body(String),
}
