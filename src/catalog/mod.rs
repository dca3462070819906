//! Test catalog access
//!
//! The coordinator only sees the [`Catalog`] trait. Two implementations are
//! provided: a local file catalog and an HTTP registry client.

mod http;
mod local;

pub use http::HttpCatalog;
pub use local::LocalCatalog;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::{SelectionCriteria, TestDescriptor};

/// Catalog query errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{0}")]
    Query(String),

    #[error("failed to read catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// External catalog of declared tests
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Return every test entry matching all supplied criteria
    async fn find(&self, criteria: &SelectionCriteria)
        -> Result<Vec<TestDescriptor>, CatalogError>;
}
