//! MTA-STS policy passthrough.
//!
//! Fetches `https://mta-sts.<domain>/.well-known/mta-sts.txt` and mirrors it
//! with permissive CORS so browser-based tooling can read policies.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use beacon_settings::MtaStsSettings;
use tracing::{debug, warn};

/// Failures that turn a policy fetch into a 404.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Request failed: DNS, TLS, connect or timeout.
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Upstream answered with something other than `text/plain`.
    #[error("received the wrong content type: {0}")]
    ContentType(String),
}

/// HTTP client for policy fetches.
#[derive(Clone)]
pub struct MtaStsProxy {
    client: reqwest::Client,
    url_template: String,
}

impl MtaStsProxy {
    /// Build a proxy with the configured URL template and timeout.
    pub fn new(settings: &MtaStsSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url_template: settings.url_template.clone(),
        })
    }

    /// Policy URL for `domain`.
    pub fn policy_url(&self, domain: &str) -> String {
        self.url_template.replace("{domain}", domain)
    }

    /// Fetch the policy for `domain` and build the client response.
    pub async fn fetch(&self, domain: &str) -> Response {
        match self.try_fetch(domain).await {
            Ok(response) => response,
            Err(e) => {
                warn!(domain, error = %e, "failed to fetch MTA-STS policy");
                not_found()
            }
        }
    }

    async fn try_fetch(&self, domain: &str) -> Result<Response, ProxyError> {
        let url = self.policy_url(domain);
        let upstream = self
            .client
            .get(&url)
            .header(header::ACCEPT, "text/plain")
            .send()
            .await?;

        if let Some(content_type) = upstream.headers().get(header::CONTENT_TYPE) {
            let content_type = String::from_utf8_lossy(content_type.as_bytes());
            if !content_type.starts_with("text/plain") {
                return Err(ProxyError::ContentType(content_type.into_owned()));
            }
        }

        let status = upstream.status();
        debug!(domain, %url, %status, "proxying MTA-STS policy");

        Ok((
            status,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("text/plain")),
                (header::CONTENT_DISPOSITION, HeaderValue::from_static("inline")),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            ],
            Body::from_stream(upstream.bytes_stream()),
        )
            .into_response())
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn proxy_for(server: &MockServer) -> MtaStsProxy {
        MtaStsProxy::new(&MtaStsSettings {
            url_template: format!("{}/{{domain}}/.well-known/mta-sts.txt", server.uri()),
            timeout_ms: 2_000,
            ..MtaStsSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn default_template_targets_policy_host() {
        let proxy = MtaStsProxy::new(&MtaStsSettings::default()).unwrap();
        assert_eq!(
            proxy.policy_url("example.com"),
            "https://mta-sts.example.com/.well-known/mta-sts.txt"
        );
    }

    #[tokio::test]
    async fn plain_text_policy_is_mirrored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/example.com/.well-known/mta-sts.txt"))
            .and(header_eq("accept", "text/plain"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "version: STSv1\nmode: enforce\n",
                    "text/plain; charset=utf-8",
                ),
            )
            .mount(&server)
            .await;

        let response = proxy_for(&server).await.fetch("example.com").await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CONTENT_DISPOSITION], "inline");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"version: STSv1\nmode: enforce\n");
    }

    #[tokio::test]
    async fn upstream_status_is_mirrored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(410).set_body_raw("gone", "text/plain"))
            .mount(&server)
            .await;

        let response = proxy_for(&server).await.fetch("example.com").await;
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn html_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let response = proxy_for(&server).await.fetch("example.com").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_not_found() {
        let proxy = MtaStsProxy::new(&MtaStsSettings {
            url_template: "http://127.0.0.1:1/{domain}".into(),
            timeout_ms: 500,
            ..MtaStsSettings::default()
        })
        .unwrap();
        let response = proxy.fetch("example.com").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
