use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use storage::{AvailableSpace, NodeId, PartName};

use crate::{NetworkError, NodeClient, PartStream, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// PEM root certificate trusted in addition to the system roots.
    pub root_ca_pem: Option<Vec<u8>>,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            root_ca_pem: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Shared HTTP client. One pooled HTTP/2 connection per node is reused
    /// for every part transfer.
    pub fn build(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(pem) = &self.root_ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| NetworkError::Tls(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }

        builder
            .build()
            .map_err(|e| NetworkError::Tls(e.to_string()))
    }
}

/// `NodeClient` speaking the node-facing HTTP API.
pub struct HttpNodeClient {
    id: NodeId,
    base: String,
    http: reqwest::Client,
}

impl HttpNodeClient {
    pub fn new(addr: &str, http: reqwest::Client) -> Result<Self> {
        let base = parse_base_url(addr)?;
        Ok(Self {
            id: addr.to_string(),
            base,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base, path)
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upload(&self, part: &PartName, body: PartStream) -> Result<()> {
        tracing::debug!(part = %part, node = %self.id, "Uploading part");

        let response = self
            .http
            .post(self.url(&format!("uploadFile/{part}")))
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        check_status(&self.id, &part.to_string(), response).await?;

        tracing::debug!(part = %part, node = %self.id, "Part uploaded");
        Ok(())
    }

    async fn download(&self, part: &PartName) -> Result<PartStream> {
        let response = self
            .http
            .get(self.url(&format!("getFile/{part}")))
            .send()
            .await?;
        let response = check_status(&self.id, &part.to_string(), response).await?;

        Ok(response.bytes_stream().map_err(NetworkError::from).boxed())
    }

    async fn space_report(&self) -> Result<AvailableSpace> {
        let response = self.http.get(self.url("getAvailableSpace")).send().await?;
        let response = check_status(&self.id, "available space", response).await?;
        Ok(response.json::<AvailableSpace>().await?)
    }
}

/// Accepts absolute `http`/`https` URLs and returns them without a trailing
/// slash.
pub fn parse_base_url(addr: &str) -> Result<String> {
    let url = Url::parse(addr).map_err(|_| NetworkError::InvalidAddress(addr.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(NetworkError::InvalidAddress(addr.to_string()));
    }
    Ok(addr.trim_end_matches('/').to_string())
}

/// Maps non-success responses onto `NetworkError`. `subject` names what was
/// asked for, for the conflict and not-found cases.
pub(crate) async fn check_status(
    peer: &str,
    subject: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::CONFLICT => Err(NetworkError::AlreadyExists(subject.to_string())),
        StatusCode::NOT_FOUND => Err(NetworkError::NotFound(subject.to_string())),
        status => {
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            Err(NetworkError::Status {
                peer: peer.to_string(),
                status: status.as_u16(),
                message,
            })
        }
    }
}
