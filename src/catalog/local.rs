//! File-backed catalog
//!
//! Reads a YAML or JSON list of catalog entries once and filters in memory.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use super::{Catalog, CatalogError};
use crate::models::{CatalogEntry, SelectionCriteria, TestDescriptor};

/// In-memory catalog, optionally loaded from a file
#[derive(Clone, Debug, Default)]
pub struct LocalCatalog {
    entries: Vec<CatalogEntry>,
}

impl LocalCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    #[cfg(test)]
    pub fn from_descriptors(tests: impl IntoIterator<Item = TestDescriptor>) -> Self {
        Self::new(tests.into_iter().map(CatalogEntry::test).collect())
    }

    /// Load entries from a `.yaml`/`.yml` or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let entries: Vec<CatalogEntry> = if is_yaml_file(path) {
            serde_yaml::from_str(&content).map_err(|e| CatalogError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| CatalogError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        debug!("Loaded {} catalog entries from {}", entries.len(), path.display());
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Catalog for LocalCatalog {
    async fn find(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<Vec<TestDescriptor>, CatalogError> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.is_test() && criteria.matches(&entry.descriptor))
            .map(|entry| entry.descriptor.clone())
            .collect())
    }
}

fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
