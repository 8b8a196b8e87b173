use api::{OrchestratorConfig, TlsFiles};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ShardStoreError};

/// Flags of the `front` role. Every flag can also come from the environment.
#[derive(Debug, Clone, Args)]
pub struct FrontArgs {
    /// Listen address of the client-facing API
    #[arg(long, env = "FRONT_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// Deadline for a whole upload, in seconds
    #[arg(long, env = "FRONT_READ_TIMEOUT_SECS", default_value_t = 10)]
    pub read_timeout_secs: u64,

    /// Deadline for a whole download, in seconds
    #[arg(long, env = "FRONT_WRITE_TIMEOUT_SECS", default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// Largest accepted object, in bytes
    #[arg(long, env = "FRONT_MAX_FILE_SIZE_BYTES", default_value_t = 1 << 30)]
    pub max_file_size: u64,

    /// Number of parts every object is split into
    #[arg(long, env = "FRONT_PARTS_COUNT", default_value_t = 6)]
    pub parts_count: usize,

    /// Storage node base URLs, e.g. https://store-1:9090
    #[arg(long, env = "FRONT_STORE_ADDRS", value_delimiter = ',', required = true)]
    pub store_addrs: Vec<String>,

    /// Directory of the placement metadata database
    #[arg(long, env = "FRONT_DB_PATH", default_value = "data/front/meta")]
    pub db_path: PathBuf,

    /// PEM root certificate trusted for storage node TLS
    #[arg(long, env = "FRONT_STORE_CA_CERT")]
    pub store_ca_cert: Option<PathBuf>,

    /// Seconds between storage node space polls
    #[arg(long, env = "FRONT_REFRESH_INTERVAL_SECS", default_value_t = 10)]
    pub refresh_interval_secs: u64,

    /// Deadline for one node's space poll, in seconds
    #[arg(long, env = "FRONT_POLL_TIMEOUT_SECS", default_value_t = 3)]
    pub poll_timeout_secs: u64,

    #[arg(long, env = "FRONT_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "FRONT_TLS_KEY")]
    pub tls_key: Option<PathBuf>,
}

/// Flags of the `store` role.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Listen address of the node-facing API
    #[arg(long, env = "STORE_SERVER_ADDR", default_value = "0.0.0.0:9090")]
    pub addr: SocketAddr,

    /// Directory blobs are written to
    #[arg(long, env = "STORE_BASE_PATH", default_value = "data/store/1")]
    pub base_path: PathBuf,

    /// Capacity reported to the front, in bytes
    #[arg(long, env = "STORE_TOTAL_SIZE_BYTES", default_value_t = 1 << 30)]
    pub total_size: u64,

    #[arg(long, env = "STORE_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "STORE_TLS_KEY")]
    pub tls_key: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FrontConfig {
    pub addr: SocketAddr,
    pub tls: Option<TlsFiles>,
    pub db_path: PathBuf,
    pub store_addrs: Vec<String>,
    pub store_ca_cert: Option<PathBuf>,
    pub orchestrator: OrchestratorConfig,
    pub placement: network::Config,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub addr: SocketAddr,
    pub tls: Option<TlsFiles>,
    pub base_path: PathBuf,
    pub total_size: u64,
}

impl FrontArgs {
    pub fn validate(self) -> Result<FrontConfig> {
        if self.parts_count == 0 {
            return Err(invalid("parts count must be at least 1"));
        }
        if self.max_file_size == 0 {
            return Err(invalid("max file size must be at least 1 byte"));
        }
        if self.read_timeout_secs == 0 || self.write_timeout_secs == 0 {
            return Err(invalid("read and write timeouts must be non-zero"));
        }
        if self.poll_timeout_secs >= self.refresh_interval_secs {
            return Err(invalid(format!(
                "poll timeout ({}s) must be shorter than the refresh interval ({}s)",
                self.poll_timeout_secs, self.refresh_interval_secs
            )));
        }

        let store_addrs: Vec<String> = self
            .store_addrs
            .iter()
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty())
            .collect();
        if store_addrs.is_empty() {
            return Err(invalid("at least one store address is required"));
        }
        for addr in &store_addrs {
            network::parse_base_url(addr)
                .map_err(|_| invalid(format!("store address {addr:?} is not an http(s) URL")))?;
        }

        Ok(FrontConfig {
            addr: self.addr,
            tls: tls_files(self.tls_cert, self.tls_key)?,
            db_path: self.db_path,
            store_addrs,
            store_ca_cert: self.store_ca_cert,
            orchestrator: OrchestratorConfig {
                max_file_size_bytes: self.max_file_size,
                parts_count: self.parts_count,
                read_timeout: Duration::from_secs(self.read_timeout_secs),
                write_timeout: Duration::from_secs(self.write_timeout_secs),
            },
            placement: network::Config {
                refresh_interval: Duration::from_secs(self.refresh_interval_secs),
                poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            },
        })
    }
}

impl StoreArgs {
    pub fn validate(self) -> Result<StoreConfig> {
        Ok(StoreConfig {
            addr: self.addr,
            tls: tls_files(self.tls_cert, self.tls_key)?,
            base_path: self.base_path,
            total_size: self.total_size,
        })
    }
}

fn tls_files(cert: Option<PathBuf>, key: Option<PathBuf>) -> Result<Option<TlsFiles>> {
    match (cert, key) {
        (Some(cert), Some(key)) => Ok(Some(TlsFiles { cert, key })),
        (None, None) => Ok(None),
        _ => Err(invalid("TLS certificate and key must be given together")),
    }
}

fn invalid(message: impl Into<String>) -> ShardStoreError {
    ShardStoreError::InvalidConfig(message.into())
}
