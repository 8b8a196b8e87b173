pub mod config;
pub mod error;
pub mod node;

pub use config::{FrontArgs, FrontConfig, StoreArgs, StoreConfig};
pub use error::{Result, ShardStoreError};
pub use node::{FrontNode, StoreNode};

// Re-export key types from workspace crates
pub use api;
pub use network;
pub use storage;
pub use system;
