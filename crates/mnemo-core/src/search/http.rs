//! JSON client for a local vector-similarity service.
//!
//! The service exposes two endpoints:
//!
//! - `POST {base}/add` with a [`VectorDocument`] body
//! - `POST {base}/query` with `{ "text", "filter", "limit" }`, answering
//!   with [`VectorResults`]

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{BackendFilter, VectorBackend, VectorDocument, VectorResults};
use crate::{MnemoError, MnemoResult};

const BACKEND_NAME: &str = "http-vector";

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    filter: &'a BackendFilter,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct Ack {}

/// Vector backend over HTTP
#[derive(Clone)]
pub struct HttpVectorBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpVectorBackend {
    /// Client for `base_url`; `timeout` bounds every request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> MnemoResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MnemoError::backend(BACKEND_NAME, format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> MnemoResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Vector service request");

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| MnemoError::backend(BACKEND_NAME, format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            resp.json()
                .await
                .map_err(|e| MnemoError::backend(BACKEND_NAME, format!("failed to parse response: {e}")))
        } else {
            let error_text = resp.text().await.unwrap_or_default();
            Err(MnemoError::backend(BACKEND_NAME, format!("service error {status}: {error_text}")))
        }
    }
}

#[async_trait]
impl VectorBackend for HttpVectorBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn add(&self, document: VectorDocument) -> MnemoResult<()> {
        let _: Ack = self.post("/add", &document).await?;
        Ok(())
    }

    async fn query(&self, text: &str, filter: &BackendFilter, limit: usize) -> MnemoResult<VectorResults> {
        self.post("/query", &QueryRequest { text, filter, limit }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::DocRef;

    #[test]
    fn test_base_url_trailing_slash() {
        let backend = HttpVectorBackend::new("http://127.0.0.1:8765/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "http://127.0.0.1:8765");
    }

    #[test]
    fn test_wire_shapes() {
        let filter = BackendFilter {
            project: Some("alpha".into()),
            ..Default::default()
        };
        let body = serde_json::to_value(QueryRequest {
            text: "cache",
            filter: &filter,
            limit: 5,
        })
        .unwrap();
        assert_eq!(body["filter"]["project"], "alpha");
        assert_eq!(body["limit"], 5);

        let results: VectorResults = serde_json::from_str(
            r#"{"hits":[{"kind":"observation","id":7,"distance":0.25}],"usable":true}"#,
        )
        .unwrap();
        assert_eq!(results.hits[0].doc, DocRef::observation(7));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_backend_error() {
        // port 9 (discard) is closed on test hosts
        let backend = HttpVectorBackend::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = backend.query("cache", &BackendFilter::default(), 5).await.unwrap_err();
        assert!(matches!(err, MnemoError::Backend { .. }));
    }
}
