use futures::StreamExt;
use reqwest::header::{self, HeaderMap};
use std::time::Duration;
use thiserror::Error;

use super::proxy::ProxyResolver;

/// Browser-like User-Agent. Several feed hosts serve bot UAs an error page
/// or an empty document, so we present as a desktop browser.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Response bodies beyond this are abandoned (memory guard).
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed document.
///
/// All transport conditions are folded into this enum; the client never
/// panics and never lets a raw error escape to abort a batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request exceeded the caller-supplied timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code (after redirects)
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// A successfully fetched feed document, prior to parsing.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Raw body bytes
    pub body: Vec<u8>,
    /// Charset declared by the server, lowercase; `utf-8` when omitted
    pub encoding: String,
    /// URL after redirects
    pub final_url: String,
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
}

/// HTTP client for feed documents.
///
/// Holds one `reqwest::Client` so connections are pooled across fetches.
/// Construct once per orchestrator run and pass explicitly; there is no
/// global session state.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: reqwest::Client,
    proxy: ProxyResolver,
}

impl FetchClient {
    pub fn new(proxy: ProxyResolver) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, proxy })
    }

    /// Fetch a feed URL.
    ///
    /// The timeout bounds the whole exchange (connect, headers, body) and
    /// is enforced here rather than trusted to the server. When a proxy
    /// base is configured the request is rewritten through it first.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Timeout`] - deadline elapsed
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::Transport`] - DNS/connect/TLS failure
    /// - [`FetchError::ResponseTooLarge`] - body over the size limit
    pub async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchedDocument, FetchError> {
        let request_url = self.proxy.rewrite(url);
        if self.proxy.is_enabled() {
            tracing::debug!(url = url, proxied = %request_url, "routing fetch through proxy");
        }

        let exchange = async {
            let response = self.client.get(&request_url).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let headers = response.headers().clone();
            let encoding = declared_charset(&headers);
            let final_url = response.url().to_string();
            let body = read_limited_bytes(response, MAX_BODY_SIZE).await?;

            Ok(FetchedDocument {
                body,
                encoding,
                final_url,
                status: status.as_u16(),
                headers,
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result.map_err(|e| match e {
                FetchError::Transport(inner) if inner.is_timeout() => FetchError::Timeout,
                other => other,
            }),
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

/// Charset from the Content-Type header, defaulting to utf-8.
fn declared_charset(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|content_type| {
            content_type.split(';').skip(1).find_map(|param| {
                param
                    .trim()
                    .to_ascii_lowercase()
                    .strip_prefix("charset=")
                    .map(|charset| charset.trim_matches('"').to_string())
            })
        })
        .unwrap_or_else(|| "utf-8".to_string())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: reject on Content-Length before reading anything
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Transport)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> FetchClient {
        FetchClient::new(ProxyResolver::disabled()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_defaults_to_utf8() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .mount(&mock_server)
            .await;

        let doc = client()
            .fetch(&format!("{}/feed", mock_server.uri()), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(doc.status, 200);
        assert_eq!(doc.encoding, "utf-8");
        assert_eq!(doc.body, b"<rss/>");
    }

    #[tokio::test]
    async fn test_fetch_reads_declared_charset() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .insert_header("Content-Type", "application/xml; charset=ISO-8859-1"),
            )
            .mount(&mock_server)
            .await;

        let doc = client()
            .fetch(&format!("{}/feed", mock_server.uri()), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(doc.encoding, "iso-8859-1");
    }

    #[tokio::test]
    async fn test_fetch_404_is_http_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let err = client()
            .fetch(&format!("{}/feed", mock_server.uri()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let err = client()
            .fetch(
                &format!("{}/feed", mock_server.uri()),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_transport() {
        // Nothing listens on port 1.
        let err = client()
            .fetch("http://127.0.0.1:1/feed", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_fetch_routes_through_proxy() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blog.example.com/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .mount(&mock_server)
            .await;

        let proxied = FetchClient::new(ProxyResolver::new(Some(&mock_server.uri()))).unwrap();
        let doc = proxied
            .fetch("https://blog.example.com/feed.xml", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(doc.body, b"<rss/>");
    }
}
