use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    Body, Client, StatusCode, Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::{SandcoreError, SandcoreResult};

use super::BlobStore;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const OCTET_STREAM: &str = "application/octet-stream";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Keeps blobs as objects behind a plain HTTP object API: `GET`, `PUT` and `HEAD` on
/// `<base_url>/<key>`.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    base_url: Url,

    /// Retries transient failures. Used for reads.
    client: ClientWithMiddleware,

    /// Streaming bodies cannot be replayed, so uploads go through the bare client.
    upload_client: Client,

    bearer_token: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HttpBlobStore {
    /// Creates a store for the bucket at `base_url`.
    pub fn new(
        base_url: &str,
        bearer_token: Option<String>,
        max_retries: u32,
    ) -> SandcoreResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SandcoreError::InvalidConfig(format!("invalid storage url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SandcoreError::InvalidConfig(format!(
                "invalid storage url: {}",
                base_url
            )));
        }

        let upload_client = Client::new();
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(upload_client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            base_url,
            client,
            upload_client,
            bearer_token,
        })
    }

    /// The URL of the object at `key`.
    pub fn object_url(&self, key: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(key.split('/'));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn download(&self, key: &str, dest: &Path) -> SandcoreResult<()> {
        let url = self.object_url(key);
        let response = self.authorize(self.client.get(url.clone())).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(SandcoreError::SnapshotNotFound(key.to_string())),
            status if !status.is_success() => {
                return Err(SandcoreError::Storage(format!(
                    "GET {} returned {}",
                    url, status
                )))
            }
            _ => {}
        }

        tracing::info!("downloading {}", url);

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(())
    }

    async fn upload(&self, source: &Path, key: &str) -> SandcoreResult<()> {
        let url = self.object_url(key);
        let file = File::open(source).await?;
        let length = file.metadata().await?.len();

        let mut request = self
            .upload_client
            .put(url.clone())
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)));

        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        tracing::info!("uploading {} ({} bytes)", url, length);

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SandcoreError::Storage(format!(
                "PUT {} returned {}",
                url,
                response.status()
            )));
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> SandcoreResult<bool> {
        let url = self.object_url(key);
        let response = self.authorize(self.client.head(url.clone())).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(SandcoreError::Storage(format!(
                "HEAD {} returned {}",
                url, status
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() -> anyhow::Result<()> {
        let store = HttpBlobStore::new("http://127.0.0.1:9000/snapshots", None, 0)?;
        assert_eq!(
            store.object_url("tenants/alice/rootfs-image").as_str(),
            "http://127.0.0.1:9000/snapshots/tenants/alice/rootfs-image"
        );

        let store = HttpBlobStore::new("http://127.0.0.1:9000/snapshots/", None, 0)?;
        assert_eq!(
            store.object_url("tenants/alice/rootfs-image").as_str(),
            "http://127.0.0.1:9000/snapshots/tenants/alice/rootfs-image"
        );

        let store = HttpBlobStore::new("http://127.0.0.1:9000", None, 0)?;
        assert_eq!(
            store.object_url("k").as_str(),
            "http://127.0.0.1:9000/k"
        );

        Ok(())
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            HttpBlobStore::new("not a url", None, 3),
            Err(SandcoreError::InvalidConfig(_))
        ));
        assert!(matches!(
            HttpBlobStore::new("mailto:ops@example.com", None, 3),
            Err(SandcoreError::InvalidConfig(_))
        ));
    }
}
