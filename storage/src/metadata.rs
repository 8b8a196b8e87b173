use async_trait::async_trait;
use std::path::Path;

use crate::object::{NodeId, ObjectId, PlacementRecord};
use crate::{Result, StorageError};

/// Durable mapping of an object to the ordered list of nodes holding its
/// parts. Uniqueness is not enforced here; callers check `exists` first.
#[async_trait]
pub trait MetadataRegistry: Send + Sync {
    async fn save(&self, id: &ObjectId, nodes: &[NodeId]) -> Result<()>;

    /// Node ids in part order, or `NotFound`.
    async fn load(&self, id: &ObjectId) -> Result<Vec<NodeId>>;

    async fn exists(&self, id: &ObjectId) -> Result<bool>;
}

/// `MetadataRegistry` on top of sled's log-structured store.
pub struct SledMetadataRegistry {
    db: sled::Db,
}

impl SledMetadataRegistry {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Opened metadata registry");
        Ok(Self { db })
    }

    /// Registry that lives only as long as the handle. Used by tests and
    /// throwaway front instances.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataRegistry for SledMetadataRegistry {
    async fn save(&self, id: &ObjectId, nodes: &[NodeId]) -> Result<()> {
        let record = PlacementRecord {
            nodes: nodes.to_vec(),
        };
        let value = bincode::serialize(&record)?;
        self.db.insert(id.as_bytes(), value)?;
        // a placement is the only pointer to the object's blobs
        self.db.flush_async().await?;

        tracing::debug!(object_id = %id, parts = nodes.len(), "Placement saved");
        Ok(())
    }

    async fn load(&self, id: &ObjectId) -> Result<Vec<NodeId>> {
        let value = self
            .db
            .get(id.as_bytes())?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let record: PlacementRecord = bincode::deserialize(&value)?;
        Ok(record.nodes)
    }

    async fn exists(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.db.contains_key(id.as_bytes())?)
    }
}
