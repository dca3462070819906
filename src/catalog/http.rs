//! HTTP registry catalog client
//!
//! Queries `GET {base}/entries?type=test&...` and expects a JSON array of
//! catalog entries in return.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
};
use std::time::Duration;
use tracing::debug;

use super::{Catalog, CatalogError};
use crate::models::{CatalogEntry, SelectionCriteria, TestDescriptor};

const ENTRIES_PATH: &str = "/entries";

/// Catalog backed by a remote registry
#[derive(Clone, Debug)]
pub struct HttpCatalog {
    client: Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
        })
    }

    /// Add a header sent with every query, e.g. an auth token
    pub fn default_header(
        mut self,
        key: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, CatalogError> {
        let name = HeaderName::from_bytes(key.as_ref().as_bytes())
            .map_err(|e| CatalogError::Query(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|e| CatalogError::Query(format!("invalid header value: {e}")))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    fn entries_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), ENTRIES_PATH)
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn find(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<Vec<TestDescriptor>, CatalogError> {
        let url = self.entries_url();
        debug!("Querying catalog {} with {}", url, criteria);

        let response = self
            .client
            .get(&url)
            .headers(self.default_headers.clone())
            .query(&criteria.query_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Query(format!(
                "{} {} from {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                url
            )));
        }

        let entries: Vec<CatalogEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            .filter(CatalogEntry::is_test)
            .map(|entry| entry.descriptor)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_url() {
        let catalog = HttpCatalog::new("http://registry:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(catalog.entries_url(), "http://registry:8080/entries");
    }

    #[test]
    fn test_invalid_header_rejected() {
        let catalog = HttpCatalog::new("http://registry", Duration::from_secs(5)).unwrap();
        assert!(catalog.default_header("bad header", "x").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_a_query_error() {
        let catalog = HttpCatalog::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = catalog
            .find(&SelectionCriteria::new().group("smoke"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Http(_)));
    }
}
