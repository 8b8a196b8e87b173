use api::{Orchestrator, Server};
use network::{ClientConfig, HttpNodeClient, NodeClient, PlacementRegistry};
use std::future::Future;
use std::sync::Arc;
use storage::{BlobStore, SledMetadataRegistry};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{FrontConfig, StoreConfig};
use crate::error::{Result, ShardStoreError};

/// The front role: client-facing API, placement of parts and the metadata
/// database.
pub struct FrontNode {
    config: FrontConfig,
    metadata: Arc<SledMetadataRegistry>,
    placement: Arc<PlacementRegistry>,
    orchestrator: Arc<Orchestrator>,
}

impl FrontNode {
    /// Opens the metadata database and polls every storage node once, so the
    /// first upload already sees a ranking.
    pub async fn new(config: FrontConfig) -> Result<Self> {
        info!(
            "Initializing front at {} with {} storage nodes",
            config.addr,
            config.store_addrs.len()
        );

        system::check_data_dir(&config.db_path)?;
        let metadata = Arc::new(SledMetadataRegistry::open(&config.db_path)?);

        let root_ca_pem = match &config.store_ca_cert {
            Some(path) => Some(tokio::fs::read(path).await.map_err(|e| {
                ShardStoreError::InvalidConfig(format!(
                    "Cannot read CA certificate {}: {}",
                    path.display(),
                    e
                ))
            })?),
            None => None,
        };
        let http = ClientConfig {
            root_ca_pem,
            ..ClientConfig::default()
        }
        .build()?;

        let clients = config
            .store_addrs
            .iter()
            .map(|addr| -> Result<Arc<dyn NodeClient>> {
                Ok(Arc::new(HttpNodeClient::new(addr, http.clone())?))
            })
            .collect::<Result<Vec<_>>>()?;

        let placement =
            Arc::new(PlacementRegistry::connect(clients, config.placement.clone()).await);
        let orchestrator = Arc::new(Orchestrator::new(
            config.orchestrator.clone(),
            placement.clone(),
            metadata.clone(),
        ));

        Ok(Self {
            config,
            metadata,
            placement,
            orchestrator,
        })
    }

    /// Serves and refreshes node states until `shutdown` resolves, then
    /// flushes the metadata database.
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting front services");

        let (stop_tx, stop_rx) = watch::channel(());
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(());
        });

        let server = Server::new(
            self.config.addr,
            self.config.tls.clone(),
            api::front_router(self.orchestrator.clone()),
        );

        let serve = server.serve(stopped(stop_rx.clone()));
        tokio::pin!(serve);

        // the server ending on its own (e.g. a failed bind) ends the front too
        let served = tokio::select! {
            served = &mut serve => served,
            () = self.placement.run(stopped(stop_rx)) => serve.await,
        };

        if let Err(e) = &served {
            error!("Front server stopped: {}", e);
        }
        self.metadata.flush().await?;
        info!("Front stopped");

        Ok(served?)
    }
}

/// The store role: keeps blobs in one directory and serves them to fronts.
pub struct StoreNode {
    config: StoreConfig,
    store: Arc<BlobStore>,
}

impl StoreNode {
    pub async fn new(config: StoreConfig) -> Result<Self> {
        info!("Initializing storage node at {}", config.addr);

        system::check_data_dir(&config.base_path)?;
        let store = Arc::new(BlobStore::open(config.base_path.clone(), config.total_size).await?);

        Ok(Self { config, store })
    }

    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting storage node services");

        Server::new(self.config.addr, self.config.tls, api::store_router(self.store))
            .serve(shutdown)
            .await?;

        info!("Storage node stopped");
        Ok(())
    }
}

/// Resolves once a stop has been sent, or the sender is gone.
async fn stopped(mut stop: watch::Receiver<()>) {
    let _ = stop.changed().await;
}
