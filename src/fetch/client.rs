use super::ImageFetcher;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!("Fetching external image {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::warn!("Failed to request {}: {}", url, e);
            e
        })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!("Remote host answered {} for {}", status, url);
            return Err(Error::Fetch(format!("{} returned status {}", url, status)));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Fetch(format!("{} returned an empty body", url)));
        }

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = MockServer::start().await;
        let body = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

        Mock::given(method("GET"))
            .and(path("/pic.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let fetched = fetcher
            .fetch(&format!("{}/pic.jpg", server.uri()))
            .await
            .unwrap();
        assert_eq!(fetched, body);
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch(&format!("{}/missing.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
    }

    #[tokio::test]
    async fn test_fetch_gives_up_on_slow_host() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0xFF, 0xD8, 0xFF])
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        let err = fetcher
            .fetch(&format!("{}/slow.jpg", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Http(ref e) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();
        let err = fetcher.fetch("http://127.0.0.1:9/pic.jpg").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_relative_url() {
        let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();
        assert!(fetcher.fetch("/images/pic.jpg").await.is_err());
    }
}
