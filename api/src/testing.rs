use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use network::{NetworkError, NodeClient, PartStream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use storage::{AvailableSpace, PartName};

/// In-memory node that counts every call.
pub(crate) struct MemoryNode {
    id: String,
    pub(crate) blobs: Mutex<HashMap<String, Bytes>>,
    pub(crate) calls: AtomicUsize,
    pub(crate) fail_uploads: AtomicBool,
}

impl MemoryNode {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            blobs: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            fail_uploads: AtomicBool::new(false),
        })
    }

    pub(crate) fn blob(&self, name: &str) -> Option<Bytes> {
        self.blobs.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeClient for MemoryNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upload(&self, part: &PartName, mut body: PartStream) -> network::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(NetworkError::Status {
                peer: self.id.clone(),
                status: 500,
                message: "disk full".to_string(),
            });
        }
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        let mut blobs = self.blobs.lock().unwrap();
        if blobs.contains_key(&part.to_string()) {
            return Err(NetworkError::AlreadyExists(part.to_string()));
        }
        blobs.insert(part.to_string(), Bytes::from(data));
        Ok(())
    }

    async fn download(&self, part: &PartName) -> network::Result<PartStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let blob = self
            .blob(&part.to_string())
            .ok_or_else(|| NetworkError::NotFound(part.to_string()))?;
        // hand it back in small chunks
        let chunks: Vec<network::Result<Bytes>> = blob
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn space_report(&self) -> network::Result<AvailableSpace> {
        Ok(AvailableSpace { total: 100, used: 0 })
    }
}
