use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use catalog_core::{BlobGateway, BlobRef, CatalogError, MediaKind};
use dashmap::DashMap;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 200;

/// REST client for the blob service.
///
/// `POST {base}/blobs?kind=...` stores bytes and answers with the opaque
/// reference; `GET {base}/blobs/{ref}` resolves it back. 429 responses are
/// retried with exponential backoff.
pub struct HttpBlobGateway {
    http_client: HttpClient,
    base_url: String,
    api_token: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    id: String,
}

impl HttpBlobGateway {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url,
            api_token,
        }
    }

    /// Send a request with exponential backoff retry on 429.
    async fn send_with_retry(
        &self,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response, CatalogError> {
        let mut delay = Duration::from_millis(BASE_DELAY_MS);

        for attempt in 0..=MAX_RETRIES {
            let response = build_request()
                .send()
                .await
                .map_err(|e| CatalogError::Transport(format!("blob request failed: {e}")))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            if attempt == MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                return Err(CatalogError::Transport(format!(
                    "blob service rate limited after {MAX_RETRIES} retries: {text}"
                )));
            }

            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "blob service rate limited (429), retrying"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        unreachable!()
    }

    fn kind_param(kind: MediaKind) -> &'static str {
        match kind {
            MediaKind::Compressed => "compressed",
            MediaKind::Original => "original",
        }
    }
}

#[async_trait]
impl BlobGateway for HttpBlobGateway {
    #[instrument(skip(self, bytes), level = "debug", fields(len = bytes.len()))]
    async fn upload(&self, bytes: Bytes, kind: MediaKind) -> Result<BlobRef, CatalogError> {
        let url = format!(
            "{}/blobs?kind={}",
            self.base_url,
            Self::kind_param(kind)
        );

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", self.api_token))
                    .header("Content-Type", "application/octet-stream")
                    .body(bytes.clone())
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CatalogError::Transport(format!(
                "blob upload failed with status {status}: {text}"
            )));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::Transport(format!("bad blob upload response: {e}")))?;
        debug!("blob uploaded as {}", body.id);
        Ok(BlobRef::new(body.id))
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch(&self, blob: &BlobRef) -> Result<Bytes, CatalogError> {
        let url = format!(
            "{}/blobs/{}",
            self.base_url,
            urlencoding::encode(blob.as_str())
        );

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .get(&url)
                    .header("Authorization", format!("Bearer {}", self.api_token))
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CatalogError::Transport(format!(
                "blob fetch failed with status {status}: {text}"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| CatalogError::Transport(format!("failed to read blob body: {e}")))
    }
}

/// In-process gateway for tests and single-process local runs.
#[derive(Default)]
pub struct MemoryBlobGateway {
    blobs: DashMap<String, (Bytes, MediaKind)>,
    next_id: AtomicU64,
}

impl MemoryBlobGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobGateway for MemoryBlobGateway {
    async fn upload(&self, bytes: Bytes, kind: MediaKind) -> Result<BlobRef, CatalogError> {
        let id = format!("blob-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.blobs.insert(id.clone(), (bytes, kind));
        Ok(BlobRef::new(id))
    }

    async fn fetch(&self, blob: &BlobRef) -> Result<Bytes, CatalogError> {
        self.blobs
            .get(blob.as_str())
            .map(|entry| entry.0.clone())
            .ok_or_else(|| CatalogError::Transport(format!("unknown blob {blob}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn upload_posts_bytes_and_parses_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/blobs"))
            .and(query_param("kind", "original"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"b-42"}"#))
            .mount(&server)
            .await;

        let gateway = HttpBlobGateway::new(server.uri(), "token".into());
        let blob = gateway
            .upload(Bytes::from_static(b"img"), MediaKind::Original)
            .await
            .unwrap();
        assert_eq!(blob.as_str(), "b-42");
    }

    #[tokio::test]
    async fn fetch_resolves_reference_to_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blobs/b-42"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"img".to_vec()))
            .mount(&server)
            .await;

        let gateway = HttpBlobGateway::new(server.uri(), "token".into());
        let bytes = gateway.fetch(&BlobRef::new("b-42")).await.unwrap();
        assert_eq!(bytes.as_ref(), b"img");
    }

    #[tokio::test]
    async fn upload_failure_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/blobs"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gateway = HttpBlobGateway::new(server.uri(), "token".into());
        assert!(matches!(
            gateway
                .upload(Bytes::from_static(b"img"), MediaKind::Original)
                .await,
            Err(CatalogError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn memory_gateway_round_trips() {
        let gateway = MemoryBlobGateway::new();
        let blob = gateway
            .upload(Bytes::from_static(b"img"), MediaKind::Compressed)
            .await
            .unwrap();
        assert_eq!(gateway.fetch(&blob).await.unwrap().as_ref(), b"img");
        assert!(gateway.fetch(&BlobRef::new("nope")).await.is_err());
    }
}
