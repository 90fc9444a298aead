//! Observation sources for effect correlation
//!
//! An observation source answers "what does the process look like
//! right now" from the outside, typically an HMI status endpoint
//! sitting next to the PLC. The scanner compares snapshots taken
//! before and after each memory write.

use async_trait::async_trait;
use icsprobe_core::{Error, ObservationSnapshot, Result};
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of point-in-time observations of the target process
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Fetch one snapshot of the current state
    async fn fetch(&self) -> Result<ObservationSnapshot>;

    /// Where the observations come from, for logs and reports
    fn endpoint(&self) -> &str;
}

/// Observation source backed by an HTTP endpoint returning JSON.
///
/// Any failure mode is an `Error::Fetch`: unreachable endpoint,
/// non-success status, a body that is not JSON, or a JSON root that is
/// not an object.
pub struct HttpObservationSource {
    url: String,
    client: reqwest::Client,
}

impl HttpObservationSource {
    pub fn new<S: Into<String>>(url: S) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout<S: Into<String>>(url: S, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::fetch(format!("HTTP client setup: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ObservationSource for HttpObservationSource {
    async fn fetch(&self) -> Result<ObservationSnapshot> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("GET {}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("GET {} returned {}", self.url, status)));
        }

        let doc: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::fetch(format!("GET {}: body is not JSON: {}", self.url, e)))?;

        let snapshot = ObservationSnapshot::from_json(&doc).ok_or_else(|| {
            Error::fetch(format!("GET {}: JSON root is not an object", self.url))
        })?;
        debug!(url = %self.url, fields = snapshot.len(), "observation fetched");
        Ok(snapshot)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icsprobe_core::FieldValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server returning a canned response
    async fn spawn_http(status_line: &'static str, content_type: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request).await;
                let response = format!(
                    "{status_line}\r\nContent-Type: {content_type}\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}/status", addr)
    }

    #[tokio::test]
    async fn test_fetch_flattens_json_status() {
        let url = spawn_http(
            "HTTP/1.1 200 OK",
            "application/json",
            r#"{"alarm": false, "tank": {"level": 7}}"#,
        )
        .await;

        let source = HttpObservationSource::new(&url).unwrap();
        let snapshot = source.fetch().await.unwrap();
        assert_eq!(snapshot.get("alarm"), Some(&FieldValue::Bool(false)));
        assert_eq!(snapshot.get("tank.level"), Some(&FieldValue::Number(7.0)));
        assert_eq!(source.endpoint(), url);
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_error() {
        let url = spawn_http(
            "HTTP/1.1 500 Internal Server Error",
            "application/json",
            "{}",
        )
        .await;

        let source = HttpObservationSource::new(&url).unwrap();
        match source.fetch().await {
            Err(Error::Fetch(msg)) => assert!(msg.contains("500")),
            other => panic!("expected Fetch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_fetch_error() {
        let url = spawn_http("HTTP/1.1 200 OK", "text/html", "<html>maintenance</html>").await;

        let source = HttpObservationSource::new(&url).unwrap();
        match source.fetch().await {
            Err(Error::Fetch(msg)) => assert!(msg.contains("not JSON")),
            other => panic!("expected Fetch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_object_root_is_fetch_error() {
        let url = spawn_http("HTTP/1.1 200 OK", "application/json", "[1, 2, 3]").await;

        let source = HttpObservationSource::new(&url).unwrap();
        match source.fetch().await {
            Err(Error::Fetch(msg)) => assert!(msg.contains("not an object")),
            other => panic!("expected Fetch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_fetch_error() {
        // port 1 on loopback refuses immediately
        let source = HttpObservationSource::new("http://127.0.0.1:1/status").unwrap();
        assert!(matches!(source.fetch().await, Err(Error::Fetch(_))));
    }
}
