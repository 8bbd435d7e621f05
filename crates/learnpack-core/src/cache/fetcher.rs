//! Network side of the cache controller.

use std::time::Duration;

use crate::cache::request::FetchRequest;
use crate::cache::store::CachedResponse;
use crate::error::FetchError;

/// Request headers worth forwarding upstream. Conditional headers are left out so
/// that every cached snapshot carries a full body.
const FORWARDED_HEADERS: [&str; 6] = [
    "accept",
    "accept-language",
    "authorization",
    "content-type",
    "cookie",
    "user-agent",
];

/// Response headers that describe the hop, not the resource.
const HOP_HEADERS: [&str; 4] = ["connection", "transfer-encoding", "keep-alive", "content-length"];

/// Anything that can turn a request into a response over the network.
///
/// An `Err` means the network itself failed (offline, DNS, refused, timeout).
/// HTTP error statuses come back as `Ok` responses.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, FetchError>;
}

/// `reqwest`-backed fetcher. Relies on the client's own timeout; the strategies add none.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fetcher whose requests fail after `timeout` (the "platform request timeout").
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, FetchError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|_| FetchError::InvalidUrl(request.url.clone()))?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FetchError::InvalidUrl(format!("{} {}", request.method, request.url)))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            if FORWARDED_HEADERS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name))
            {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let mut snapshot = CachedResponse::new(status, final_url, body.to_vec());
        snapshot.headers = headers;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_returns_status_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/curriculum/grades"))
            .and(header("accept", "application/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"grades":[9,10]}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new();
        let req = FetchRequest::get(format!("{}/api/v1/curriculum/grades", server.uri()))
            .with_header("Accept", "application/json")
            .with_header("If-None-Match", "\"etag\"");
        let resp = fetcher.fetch(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type(), Some("application/json"));
        assert_eq!(resp.body, br#"{"grades":[9,10]}"#.to_vec());
        assert!(resp.header("content-length").is_none());
    }

    #[tokio::test]
    async fn http_error_status_is_a_response_not_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let resp = ReqwestFetcher::new()
            .fetch(&FetchRequest::get(format!("{}/boom", server.uri())))
            .await
            .unwrap();
        assert_eq!(resp.status, 500);
        assert!(!resp.is_ok());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ReqwestFetcher::new()
            .fetch(&FetchRequest::get(format!("http://{}/", addr)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn relative_url_is_rejected() {
        let err = ReqwestFetcher::new()
            .fetch(&FetchRequest::get("/no-origin"))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::InvalidUrl("/no-origin".to_string()));
    }
}
