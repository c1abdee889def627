use std::time::Duration;

use async_trait::async_trait;
use catalog_core::{SlotError, SlotSnapshot, SlotTransport};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument, warn};

const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 200;

/// Version header carried on every slot response.
const VERSION_HEADER: &str = "x-slot-version";

/// REST client for the remote slot service.
///
/// The slot is one addressable object: GET returns the current content and
/// version, PUT is conditional on `if-match: <version>`. Rate-limit
/// responses (429) are retried with exponential backoff.
pub struct HttpSlot {
    http_client: HttpClient,
    url: String,
    api_token: String,
}

impl HttpSlot {
    pub fn new(url: String, api_token: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            url,
            api_token,
        }
    }

    /// Send a request with exponential backoff retry on 429.
    async fn send_with_retry(
        &self,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response, SlotError> {
        let mut delay = Duration::from_millis(BASE_DELAY_MS);

        for attempt in 0..=MAX_RETRIES {
            let response = build_request()
                .send()
                .await
                .map_err(|e| SlotError::Transport(format!("slot request failed: {e}")))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            if attempt == MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                return Err(SlotError::Transport(format!(
                    "slot rate limited after {MAX_RETRIES} retries: {text}"
                )));
            }

            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "slot rate limited (429), retrying"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        unreachable!()
    }

    fn version_of(response: &Response) -> Result<u64, SlotError> {
        response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                SlotError::Transport(format!("slot response missing {VERSION_HEADER} header"))
            })
    }
}

#[async_trait]
impl SlotTransport for HttpSlot {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self) -> Result<Option<SlotSnapshot>, SlotError> {
        let response = self
            .send_with_retry(|| {
                self.http_client
                    .get(&self.url)
                    .header("Authorization", format!("Bearer {}", self.api_token))
            })
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("slot not found");
            return Ok(None);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SlotError::Transport(format!(
                "slot GET failed with status {status}: {text}"
            )));
        }

        let version = Self::version_of(&response)?;
        let content = response
            .text()
            .await
            .map_err(|e| SlotError::Transport(format!("failed to read slot response: {e}")))?;

        debug!("slot GET version {} ({} bytes)", version, content.len());
        Ok(Some(SlotSnapshot { content, version }))
    }

    #[instrument(skip(self, content), level = "debug", fields(content_len = content.len()))]
    async fn put(&self, content: &str, expected_version: u64) -> Result<u64, SlotError> {
        let content = content.to_string();

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .put(&self.url)
                    .header("Authorization", format!("Bearer {}", self.api_token))
                    .header("Content-Type", "application/json")
                    .header("If-Match", expected_version.to_string())
                    .body(content.clone())
            })
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
            debug!(expected_version, "slot PUT rejected, version moved");
            return Err(SlotError::Conflict);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SlotError::Transport(format!(
                "slot PUT failed with status {status}: {text}"
            )));
        }

        let version = Self::version_of(&response)?;
        debug!("slot PUT committed version {} ({} bytes)", version, content.len());
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn slot_for(server: &MockServer) -> HttpSlot {
        HttpSlot::new(format!("{}/slot", server.uri()), "test-token".into())
    }

    #[tokio::test]
    async fn get_returns_content_and_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slot"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"comics\":[]}")
                    .insert_header(VERSION_HEADER, "7"),
            )
            .mount(&server)
            .await;

        let snapshot = slot_for(&server).get().await.unwrap().unwrap();
        assert_eq!(snapshot.version, 7);
        assert_eq!(snapshot.content, "{\"comics\":[]}");
    }

    #[tokio::test]
    async fn get_maps_404_to_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slot"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(slot_for(&server).get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_carries_expected_version_and_returns_new_one() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/slot"))
            .and(header("If-Match", "3"))
            .respond_with(ResponseTemplate::new(200).insert_header(VERSION_HEADER, "4"))
            .mount(&server)
            .await;

        let version = slot_for(&server).put("{}", 3).await.unwrap();
        assert_eq!(version, 4);
    }

    #[tokio::test]
    async fn put_maps_precondition_failure_to_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/slot"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        assert!(matches!(
            slot_for(&server).put("{}", 3).await,
            Err(SlotError::Conflict)
        ));
    }

    #[tokio::test]
    async fn server_errors_surface_as_transport() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/slot"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        assert!(matches!(
            slot_for(&server).put("{}", 0).await,
            Err(SlotError::Transport(_))
        ));
    }
}
