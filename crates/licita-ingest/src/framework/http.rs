//! HTTP access with bounded retries
//!
//! Transient failures (429, 500, 502, 503, 504, connection resets and
//! timeouts) are retried with exponential backoff. Any other non-success
//! status fails immediately.

use crate::config::HttpSettings;
use crate::error::{IngestError, Result};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared HTTP client for every source
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    settings: HttpSettings,
}

impl HttpClient {
    pub fn new(settings: HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.as_str())
            .build()?;

        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// Download a resource with the default timeout
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes_with_timeout(url, self.settings.timeout()).await
    }

    pub async fn get_bytes_with_timeout(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let response = self.send(Method::GET, url, timeout, None).await?;
        let bytes = response.bytes().await?;
        debug!(url = %url, bytes = bytes.len(), "downloaded");
        Ok(bytes.to_vec())
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.send(Method::GET, url, self.settings.timeout(), None).await?;
        Ok(response.text().await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .send(Method::GET, url, self.settings.timeout(), Some("application/json"))
            .await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Lightweight existence check: a HEAD answered with 200
    pub async fn exists(&self, url: &str) -> bool {
        match self
            .send(Method::HEAD, url, self.settings.probe_timeout(), None)
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!(url = %url, error = %e, "probe failed");
                false
            },
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
        accept: Option<&str>,
    ) -> Result<Response> {
        let max_retries = self.settings.max_retries;
        let mut attempt: u32 = 0;

        loop {
            let mut request = self.client.request(method.clone(), url).timeout(timeout);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let err = IngestError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };
                    if !is_retryable_status(status) {
                        return Err(err);
                    }
                    err
                },
                Err(e) if e.is_timeout() || e.is_connect() => IngestError::Http(e),
                Err(e) => return Err(e.into()),
            };

            if attempt >= max_retries {
                return Err(error);
            }

            let delay = backoff_delay(self.settings.retry_backoff(), attempt);
            warn!(
                url = %url,
                attempt = attempt + 1,
                max_attempts = max_retries + 1,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// `base * 2^attempt`, saturating
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(max_retries: u32) -> HttpClient {
        HttpClient::new(HttpSettings {
            max_retries,
            retry_backoff_ms: 1,
            ..HttpSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(8));
        assert_eq!(backoff_delay(Duration::MAX, 3), Duration::MAX);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::NOT_IMPLEMENTED));
    }

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.atom"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed.atom"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<feed/>"))
            .mount(&server)
            .await;

        let body = client(3)
            .get_text(&format!("{}/feed.atom", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<feed/>");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(2)
            .get_bytes(&format!("{}/busy", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(429));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(3)
            .get_bytes(&format!("{}/missing.zip", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_exists_only_for_ok() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/present.zip"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/empty.zip"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let http = client(0);
        assert!(http.exists(&format!("{}/present.zip", server.uri())).await);
        assert!(!http.exists(&format!("{}/empty.zip", server.uri())).await);
        assert!(!http.exists(&format!("{}/absent.zip", server.uri())).await);
    }
}
