use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::object::AvailableSpace;
use crate::{Result, StorageError};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Blob storage of a single node. Every blob is a flat file named after its
/// part under `base_path`; blobs are written once and never overwritten.
pub struct BlobStore {
    base_path: PathBuf,
    total_bytes: u64,
}

/// An opened blob, ready to be streamed back.
pub struct Blob {
    file: File,
    len: u64,
}

impl BlobStore {
    pub async fn open(base_path: impl Into<PathBuf>, total_bytes: u64) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        tracing::info!(path = %base_path.display(), total_bytes, "Blob store opened");

        Ok(Self {
            base_path,
            total_bytes,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Streams `body` into a new blob and syncs it to disk before returning
    /// the number of bytes written. Fails with `AlreadyExists` if the name is
    /// taken. A failed write leaves no file behind.
    pub async fn put<S, E>(&self, name: &str, mut body: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let path = self.blob_path(name)?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let guard = PartialBlobGuard::new(path);

        match write_body(&mut file, &mut body).await {
            Ok(written) => {
                guard.disarm();
                tracing::debug!(blob = name, bytes = written, "Blob stored");
                Ok(written)
            }
            Err(e) => {
                drop(file);
                guard.remove().await;
                Err(e)
            }
        }
    }

    pub async fn get(&self, name: &str) -> Result<Blob> {
        let path = self.blob_path(name)?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let len = file.metadata().await?.len();
        Ok(Blob { file, len })
    }

    /// Configured capacity and the bytes currently held, counted by walking
    /// every file under the base directory.
    pub async fn space_report(&self) -> Result<AvailableSpace> {
        let mut used = 0u64;
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    // removed between listing and stat, e.g. a failed put
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(StorageError::Io(e)),
                };
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    used += metadata.len();
                }
            }
        }

        Ok(AvailableSpace {
            total: self.total_bytes,
            used,
        })
    }

    fn blob_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
        {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.base_path.join(name))
    }
}

async fn write_body<S, E>(file: &mut File, body: &mut S) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| StorageError::Body(e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

impl Blob {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the blob in fixed-size chunks.
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        futures::stream::unfold(Some(self.file), |file| async move {
            let mut file = file?;
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            match file.read_buf(&mut buf).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(buf.freeze()), Some(file))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Owns a blob file until its write completes. Failed writes remove it with
/// [`PartialBlobGuard::remove`]; dropping an armed guard covers a cancelled
/// `put`.
struct PartialBlobGuard {
    path: PathBuf,
    armed: bool,
}

impl PartialBlobGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn remove(mut self) {
        self.armed = false;
        if let Err(e) = fs::remove_file(&self.path).await {
            tracing::warn!(path = %self.path.display(), "Failed to remove partial blob: {}", e);
        }
    }
}

impl Drop for PartialBlobGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // only reached when the put future is dropped; one unlink
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "Failed to remove partial blob: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunks(
        parts: &[&'static [u8]],
    ) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Unpin {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn read_all(blob: Blob) -> Vec<u8> {
        let mut stream = Box::pin(blob.into_stream());
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), 1024).await.unwrap();

        let written = store
            .put("obj.0", chunks(&[b"hello, ", b"there!"]))
            .await
            .unwrap();
        assert_eq!(written, 13);

        let blob = store.get("obj.0").await.unwrap();
        assert_eq!(blob.len(), 13);
        assert_eq!(read_all(blob).await, b"hello, there!");
    }

    #[tokio::test]
    async fn put_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), 1024).await.unwrap();

        store.put("obj.0", chunks(&[b"first"])).await.unwrap();
        let err = store.put("obj.0", chunks(&[b"second"])).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(name) if name == "obj.0"));

        let blob = store.get("obj.0").await.unwrap();
        assert_eq!(read_all(blob).await, b"first");
    }

    #[tokio::test]
    async fn get_missing_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), 1024).await.unwrap();

        assert!(matches!(
            store.get("nope.0").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_body_leaves_no_partial_blob() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), 1024).await.unwrap();

        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client gone")),
        ]);
        let err = store.put("obj.1", body).await.unwrap_err();
        assert!(matches!(err, StorageError::Body(_)));

        assert!(matches!(
            store.get("obj.1").await,
            Err(StorageError::NotFound(_))
        ));
        // name is free again
        store.put("obj.1", chunks(&[b"retry"])).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_put_leaves_no_partial_blob() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), 1024).await.unwrap();

        // first chunk arrives, then the sender stalls forever
        let body = chunks(&[b"partial"]).chain(futures::stream::pending());
        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(100), store.put("obj.2", body))
                .await;
        assert!(outcome.is_err());

        assert!(!dir.path().join("obj.2").exists());
        store.put("obj.2", chunks(&[b"retry"])).await.unwrap();
    }

    #[tokio::test]
    async fn names_cannot_escape_base_path() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path().join("blobs"), 1024).await.unwrap();

        for name in ["", ".", "..", "../escape", "a/b", "a\\b"] {
            let err = store.put(name, chunks(&[b"x"])).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidName(_)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn space_report_counts_stored_bytes() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), 100).await.unwrap();

        assert_eq!(
            store.space_report().await.unwrap(),
            AvailableSpace { total: 100, used: 0 }
        );

        store.put("a.0", chunks(&[b"12345"])).await.unwrap();
        store.put("a.1", chunks(&[b"678"])).await.unwrap();
        store.put("a.2", chunks(&[])).await.unwrap();

        assert_eq!(
            store.space_report().await.unwrap(),
            AvailableSpace { total: 100, used: 8 }
        );
    }

    #[tokio::test]
    async fn large_blob_streams_back_in_bounded_chunks() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), u64::MAX).await.unwrap();

        let data: Vec<u8> = (0..(3 * READ_CHUNK_SIZE + 17)).map(|i| (i % 251) as u8).collect();
        let body = futures::stream::iter(
            data.chunks(10_000)
                .map(|c| Ok::<_, std::io::Error>(Bytes::copy_from_slice(c)))
                .collect::<Vec<_>>(),
        );
        store.put("big.0", body).await.unwrap();

        let mut stream = Box::pin(store.get("big.0").await.unwrap().into_stream());
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= READ_CHUNK_SIZE);
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, data);
    }
}
