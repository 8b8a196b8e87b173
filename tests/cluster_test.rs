use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use shardstore::api::{front_router, store_router, Orchestrator, OrchestratorConfig};
use shardstore::network::{
    ClientConfig, FrontClient, HttpNodeClient, NetworkError, NodeClient, PlacementRegistry,
};
use shardstore::storage::{BlobStore, MetadataRegistry, ObjectId, SledMetadataRegistry};

const PARTS: usize = 4;
const MAX_FILE_SIZE: u64 = 256 * 1024;

async fn serve(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

struct Cluster {
    _dirs: Vec<TempDir>,
    store_dirs: Vec<std::path::PathBuf>,
    store_addrs: Vec<String>,
    metadata: Arc<SledMetadataRegistry>,
    front: FrontClient,
}

impl Cluster {
    /// `stores` running storage nodes plus any addresses that never answer.
    async fn start(stores: usize, dead: &[&str]) -> Self {
        let mut dirs = Vec::new();
        let mut store_dirs = Vec::new();
        let mut store_addrs = Vec::new();
        for _ in 0..stores {
            let dir = tempfile::tempdir().unwrap();
            let store = BlobStore::open(dir.path(), 10 * 1024 * 1024).await.unwrap();
            let addr = serve(store_router(Arc::new(store))).await;
            store_dirs.push(dir.path().to_path_buf());
            store_addrs.push(format!("http://{addr}"));
            dirs.push(dir);
        }
        store_addrs.extend(dead.iter().map(|addr| addr.to_string()));

        let http = ClientConfig::default().build().unwrap();
        let clients = store_addrs
            .iter()
            .map(|addr| {
                Arc::new(HttpNodeClient::new(addr, http.clone()).unwrap()) as Arc<dyn NodeClient>
            })
            .collect();
        let placement = PlacementRegistry::connect(
            clients,
            shardstore::network::Config {
                refresh_interval: Duration::from_secs(60),
                poll_timeout: Duration::from_secs(1),
            },
        )
        .await;

        let metadata = Arc::new(SledMetadataRegistry::temporary().unwrap());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                max_file_size_bytes: MAX_FILE_SIZE,
                parts_count: PARTS,
                read_timeout: Duration::from_secs(10),
                write_timeout: Duration::from_secs(10),
            },
            Arc::new(placement),
            metadata.clone(),
        );
        let front_addr = serve(front_router(Arc::new(orchestrator))).await;

        Self {
            _dirs: dirs,
            store_dirs,
            store_addrs,
            metadata,
            front: FrontClient::new(&format!("http://{front_addr}")).unwrap(),
        }
    }

    fn stored_parts(&self) -> Vec<(String, u64)> {
        self.store_dirs
            .iter()
            .flat_map(|dir| std::fs::read_dir(dir).unwrap())
            .map(|entry| {
                let entry = entry.unwrap();
                (
                    entry.file_name().to_string_lossy().into_owned(),
                    entry.metadata().unwrap().len(),
                )
            })
            .collect()
    }
}

fn content(size: usize) -> Bytes {
    (0..size).map(|i| (i * 7 % 251) as u8).collect::<Vec<u8>>().into()
}

#[tokio::test]
async fn object_round_trips_through_the_cluster() {
    let cluster = Cluster::start(3, &[]).await;
    let id = ObjectId::new();
    let data = content(100_003);

    cluster.front.upload_file(&id, data.clone()).await.unwrap();

    let parts = cluster.stored_parts();
    assert_eq!(parts.len(), PARTS);
    assert!(parts.iter().all(|(name, _)| name.starts_with(&id.to_string())));
    assert_eq!(parts.iter().map(|(_, len)| len).sum::<u64>(), data.len() as u64);

    let placement = cluster.metadata.load(&id).await.unwrap();
    assert_eq!(placement.len(), PARTS);
    assert!(placement.iter().all(|node| cluster.store_addrs.contains(node)));

    assert_eq!(cluster.front.get_file(&id).await.unwrap(), data);
}

#[tokio::test]
async fn streamed_upload_in_small_chunks() {
    let cluster = Cluster::start(2, &[]).await;
    let id = ObjectId::new();
    let data = content(9_000);
    let chunks: Vec<std::io::Result<Bytes>> =
        data.chunks(1_000).map(|c| Ok(Bytes::copy_from_slice(c))).collect();

    cluster
        .front
        .upload_stream(&id, data.len() as u64, futures::stream::iter(chunks))
        .await
        .unwrap();

    let mut stream = cluster.front.get_stream(&id).await.unwrap();
    let mut received = Vec::new();
    while let Some(chunk) = stream.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, data);
}

#[tokio::test]
async fn errors_reach_the_client() {
    let cluster = Cluster::start(2, &[]).await;
    let id = ObjectId::new();

    assert!(matches!(
        cluster.front.get_file(&id).await,
        Err(NetworkError::NotFound(_))
    ));

    cluster.front.upload_file(&id, content(10)).await.unwrap();
    // a conflict on re-upload is a server-side failure at the front
    assert!(matches!(
        cluster.front.upload_file(&id, content(20)).await,
        Err(NetworkError::Status { status: 500, ref message, .. })
            if message.contains("AlreadyExists")
    ));
    assert_eq!(cluster.front.get_file(&id).await.unwrap(), content(10));

    // declared size alone decides; the body is never read
    let too_big = futures::stream::iter(vec![Ok(content(10))]);
    assert!(matches!(
        cluster.front.upload_stream(&ObjectId::new(), MAX_FILE_SIZE + 1, too_big).await,
        Err(NetworkError::Status { status: 400, .. })
    ));
    assert_eq!(cluster.stored_parts().len(), PARTS);
}

#[tokio::test]
async fn unreachable_node_gets_no_parts() {
    let dead = "http://127.0.0.1:9";
    let cluster = Cluster::start(2, &[dead]).await;
    let id = ObjectId::new();
    let data = content(4_096);

    cluster.front.upload_file(&id, data.clone()).await.unwrap();

    let placement = cluster.metadata.load(&id).await.unwrap();
    assert!(!placement.iter().any(|node| node == dead));
    assert_eq!(cluster.front.get_file(&id).await.unwrap(), data);
}

#[tokio::test]
async fn all_nodes_unreachable_fails_upload() {
    let cluster = Cluster::start(0, &["http://127.0.0.1:9"]).await;

    assert!(matches!(
        cluster.front.upload_file(&ObjectId::new(), content(10)).await,
        Err(NetworkError::Status { status: 500, ref message, .. })
            if message.contains("AllNodesOffline")
    ));
}

#[tokio::test]
async fn node_client_speaks_the_node_api() {
    let dir = tempfile::tempdir().unwrap();
    let store = BlobStore::open(dir.path(), 1_000).await.unwrap();
    let addr = serve(store_router(Arc::new(store))).await;
    let http = ClientConfig::default().build().unwrap();
    let node = HttpNodeClient::new(&format!("http://{addr}"), http).unwrap();
    let part = ObjectId::new().part(0);

    let body = || {
        let chunk = Ok::<_, NetworkError>(Bytes::from_static(b"part-bytes"));
        futures::stream::iter(vec![chunk]).boxed()
    };

    node.upload(&part, body()).await.unwrap();
    assert!(matches!(node.upload(&part, body()).await, Err(NetworkError::AlreadyExists(_))));
    assert!(matches!(
        node.download(&ObjectId::new().part(1)).await,
        Err(NetworkError::NotFound(_))
    ));

    let mut downloaded = Vec::new();
    let mut stream = node.download(&part).await.unwrap();
    while let Some(chunk) = stream.next().await {
        downloaded.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(downloaded, b"part-bytes");

    let space = node.space_report().await.unwrap();
    assert_eq!(space.total, 1_000);
    assert_eq!(space.used, 10);
}
