//! HTTP object store client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::application::images::{ObjectStore, ObjectStoreError};
use crate::infra::error::InfraError;

const SOURCE: &str = "infra::object_store";

/// Reads objects with `GET {base_url}/{key}`, the key sent as one
/// percent-encoded path segment.
#[derive(Clone, Debug)]
pub struct HttpObjectStore {
    client: Client,
    base_url: Url,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| InfraError::http_client(format!("invalid base url `{base_url}`: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::http_client(format!(
                "base url `{base_url}` cannot carry a path"
            )));
        }

        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn user_agent() -> &'static str {
        concat!("pixfeed/", env!("CARGO_PKG_VERSION"))
    }

    pub fn object_url(&self, key: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(key);
        }
        url
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let url = self.object_url(key);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(ObjectStoreError::transport)?;

        let status = response.status();
        debug!(target = SOURCE, url = %url, status = status.as_u16(), "object fetched");

        if status == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound {
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ObjectStoreError::Status {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(ObjectStoreError::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_object_urls_without_double_slashes() {
        let store = HttpObjectStore::new("http://images.local/bucket/", Duration::from_secs(1))
            .expect("client builds");

        assert_eq!(
            store.object_url("cat.jpg").as_str(),
            "http://images.local/bucket/cat.jpg"
        );
    }

    #[test]
    fn encodes_reserved_characters_in_keys() {
        let store = HttpObjectStore::new("http://images.local/bucket", Duration::from_secs(1))
            .expect("client builds");

        assert_eq!(
            store.object_url("summer trip?v=2#top.jpg").as_str(),
            "http://images.local/bucket/summer%20trip%3Fv=2%23top.jpg"
        );
        assert_eq!(
            store.object_url("cat.jpg").as_str(),
            "http://images.local/bucket/cat.jpg"
        );
    }

    #[test]
    fn rejects_base_urls_without_a_path() {
        let err = HttpObjectStore::new("mailto:images@example.com", Duration::from_secs(1))
            .expect_err("not a base url");

        assert!(matches!(err, InfraError::HttpClient { .. }));
    }

    #[tokio::test]
    async fn unreachable_store_reports_transport_failure() {
        let store = HttpObjectStore::new("http://127.0.0.1:1", Duration::from_millis(500))
            .expect("client builds");

        let err = store.get("cat.jpg").await.expect_err("nothing listens there");

        assert!(matches!(err, ObjectStoreError::Transport { .. }));
        assert!(err.is_unavailable());
    }
}
