use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use storage::ObjectId;

use crate::client::{check_status, parse_base_url};
use crate::{NetworkError, PartStream, Result};

/// Client of the front's public API.
pub struct FrontClient {
    base: String,
    http: reqwest::Client,
}

impl FrontClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            base: parse_base_url(base_url)?,
            http,
        })
    }

    pub async fn upload_file(&self, id: &ObjectId, content: Bytes) -> Result<()> {
        let size = content.len() as u64;
        let body = futures::stream::once(async move { Ok::<_, std::io::Error>(content) });
        self.upload_stream(id, size, body).await
    }

    /// Uploads exactly `size` bytes read from `body`.
    pub async fn upload_stream<S>(&self, id: &ObjectId, size: u64, body: S) -> Result<()>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        let url = format!("{}/api/v1/uploadFile/{}?fileSize={}", self.base, id, size);
        let response = self
            .http
            .post(url)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        check_status(&self.base, &id.to_string(), response).await?;

        tracing::debug!(object_id = %id, size, "Object uploaded");
        Ok(())
    }

    pub async fn get_file(&self, id: &ObjectId) -> Result<Bytes> {
        let response = self.request_object(id).await?;
        Ok(response.bytes().await?)
    }

    pub async fn get_stream(&self, id: &ObjectId) -> Result<PartStream> {
        let response = self.request_object(id).await?;
        Ok(response.bytes_stream().map_err(NetworkError::from).boxed())
    }

    async fn request_object(&self, id: &ObjectId) -> Result<reqwest::Response> {
        let url = format!("{}/api/v1/getFile/{}", self.base, id);
        let response = self.http.get(url).send().await?;
        check_status(&self.base, &id.to_string(), response).await
    }
}
