use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use network::{NetworkError, NodeClient, PartStream, PlacementRegistry};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use storage::{MetadataRegistry, ObjectId, PartName};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use crate::{ApiError, ApiResult};

/// In-flight chunks buffered between the client body and a node upload.
const PART_CHANNEL_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_file_size_bytes: u64,
    pub parts_count: usize,
    /// Deadline for a whole upload.
    pub read_timeout: Duration,
    /// Deadline for a whole download, including streaming the body.
    pub write_timeout: Duration,
}

/// Splits uploads into parts placed on storage nodes and stitches them back
/// together on download.
pub struct Orchestrator {
    config: OrchestratorConfig,
    placement: Arc<PlacementRegistry>,
    metadata: Arc<dyn MetadataRegistry>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        placement: Arc<PlacementRegistry>,
        metadata: Arc<dyn MetadataRegistry>,
    ) -> Self {
        Self {
            config,
            placement,
            metadata,
        }
    }

    pub fn placement(&self) -> &PlacementRegistry {
        &self.placement
    }

    /// Stores `body`, which must be exactly `declared_size` bytes, as
    /// `parts_count` parts and records where they went.
    ///
    /// Parts are sent one after another. The first failing part aborts the
    /// upload; parts already stored stay on their nodes and no placement is
    /// recorded.
    pub async fn upload<S, E>(&self, id: ObjectId, declared_size: u64, body: S) -> ApiResult<()>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        if declared_size > self.config.max_file_size_bytes {
            return Err(ApiError::Validation(format!(
                "too big file size {}, max size {}",
                declared_size, self.config.max_file_size_bytes
            )));
        }

        tokio::time::timeout(
            self.config.read_timeout,
            self.upload_parts(id, declared_size, BodySource::new(body)),
        )
        .await
        .map_err(|_| {
            ApiError::Canceled(format!(
                "upload of {} exceeded {:?}",
                id, self.config.read_timeout
            ))
        })?
    }

    async fn upload_parts<S, E>(
        &self,
        id: ObjectId,
        declared_size: u64,
        mut source: BodySource<S>,
    ) -> ApiResult<()>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        if self.metadata.exists(&id).await? {
            return Err(ApiError::AlreadyExists(format!("file {id}")));
        }

        let parts_count = self.config.parts_count;
        let part_size = declared_size / parts_count as u64 + 1;
        let nodes = self.placement.servers_for_parts(parts_count).await?;

        let mut remaining = declared_size;
        let mut placed = Vec::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            let part = id.part(index);
            let len = part_size.min(remaining);

            upload_part(&mut source, node.as_ref(), &part, len).await?;

            remaining -= len;
            placed.push(node.id().to_string());
        }

        if source.next_slice(1).await?.is_some() {
            return Err(ApiError::Validation(format!(
                "body of {id} is longer than fileSize {declared_size}"
            )));
        }

        self.metadata.save(&id, &placed).await?;

        tracing::info!(
            object_id = %id,
            size = declared_size,
            parts = placed.len(),
            "Object stored"
        );
        Ok(())
    }

    /// Looks up where the parts of `id` live and streams them back in order.
    ///
    /// Lookup failures and a failure to open the first part are returned
    /// before any byte is produced. A later part failing ends the stream
    /// with an error.
    pub async fn download(&self, id: ObjectId) -> ApiResult<PartStream> {
        let deadline = Instant::now() + self.config.write_timeout;
        let expired = || {
            ApiError::Canceled(format!(
                "download of {} exceeded {:?}",
                id, self.config.write_timeout
            ))
        };

        let (first, rest) = tokio::time::timeout_at(deadline, async {
            let nodes = self.metadata.load(&id).await?;
            let clients = self.placement.store_clients(&nodes).await?;
            let mut clients = clients.into_iter().enumerate();

            let first = match clients.next() {
                Some((index, client)) => client.download(&id.part(index)).await.map_err(|e| {
                    tracing::warn!(
                        object_id = %id,
                        node = %client.id(),
                        "First part unavailable: {}",
                        e
                    );
                    ApiError::NodeIo(e.to_string())
                })?,
                None => futures::stream::empty().boxed(),
            };
            Ok::<_, ApiError>((first, clients))
        })
        .await
        .map_err(|_| expired())??;

        let rest = futures::stream::iter(rest)
            .then(move |(index, client)| async move { client.download(&id.part(index)).await })
            .try_flatten();
        let parts = first
            .chain(rest)
            .inspect_err(move |e| tracing::warn!(object_id = %id, "Download aborted: {}", e));

        Ok(with_deadline(parts.boxed(), deadline))
    }
}

/// Sends exactly `len` bytes of `source` to `node` as `part`.
async fn upload_part<S, E>(
    source: &mut BodySource<S>,
    node: &dyn NodeClient,
    part: &PartName,
    len: u64,
) -> ApiResult<()>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
    E: Display,
{
    let (tx, rx) = mpsc::channel(PART_CHANNEL_DEPTH);
    let body: PartStream = ReceiverStream::new(rx).boxed();

    let (sent, forwarded) = tokio::join!(node.upload(part, body), source.forward(len, tx));

    // a broken client body is the root cause of whatever the node saw
    forwarded?;
    sent.map_err(|e| {
        tracing::warn!(part = %part, node = %node.id(), "Part upload failed: {}", e);
        ApiError::from(e)
    })
}

/// Inbound body cut into slices without copying or buffering more than one
/// received chunk.
struct BodySource<S> {
    inner: S,
    pending: Bytes,
}

impl<S, E> BodySource<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
    E: Display,
{
    fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Bytes::new(),
        }
    }

    /// Up to `max` bytes, or `None` once the body is exhausted.
    async fn next_slice(&mut self, max: u64) -> ApiResult<Option<Bytes>> {
        while self.pending.is_empty() {
            match self.inner.next().await {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => {
                    return Err(ApiError::Canceled(format!("reading request body: {e}")));
                }
                None => return Ok(None),
            }
        }
        let take = (self.pending.len() as u64).min(max) as usize;
        Ok(Some(self.pending.split_to(take)))
    }

    /// Pushes `len` bytes into `tx`. On a body problem the channel gets an
    /// error item too, so the node discards what it received.
    async fn forward(
        &mut self,
        len: u64,
        tx: mpsc::Sender<network::Result<Bytes>>,
    ) -> ApiResult<()> {
        let mut remaining = len;
        while remaining > 0 {
            let chunk = match self.next_slice(remaining).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    let err = ApiError::Validation("body is shorter than fileSize".to_string());
                    let _ = tx.send(Err(NetworkError::Body(err.to_string()))).await;
                    return Err(err);
                }
                Err(err) => {
                    let _ = tx.send(Err(NetworkError::Body(err.to_string()))).await;
                    return Err(err);
                }
            };
            remaining -= chunk.len() as u64;
            if tx.send(Ok(chunk)).await.is_err() {
                // node side hung up; its error is reported instead
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Ends `stream` with a timeout error once `deadline` passes.
fn with_deadline(stream: PartStream, deadline: Instant) -> PartStream {
    let sleep = Box::pin(tokio::time::sleep_until(deadline));
    futures::stream::unfold(Some((stream, sleep)), |state| async move {
        let (mut stream, mut sleep) = state?;
        tokio::select! {
            item = stream.next() => item.map(|item| (item, Some((stream, sleep)))),
            _ = &mut sleep => Some((
                Err(NetworkError::Timeout("download exceeded write timeout".to_string())),
                None,
            )),
        }
    })
    .boxed()
}
