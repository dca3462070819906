//! Test catalog resolution

use tracing::{debug, info};

use super::CoordinatorError;
use crate::catalog::Catalog;
use crate::models::{SelectionCriteria, TestDescriptor};

/// Query the catalog for the tests a run should dispatch.
///
/// At least one criterion is required and an empty result is an error.
/// Catalog order is preserved.
pub async fn resolve(
    catalog: &dyn Catalog,
    criteria: &SelectionCriteria,
) -> Result<Vec<TestDescriptor>, CoordinatorError> {
    if criteria.is_empty() {
        return Err(CoordinatorError::InvalidSelection);
    }

    debug!("Resolving tests for {}", criteria);
    let tests = catalog.find(criteria).await?;
    if tests.is_empty() {
        return Err(CoordinatorError::NoMatch(criteria.to_string()));
    }

    info!("Resolved {} tests for {}", tests.len(), criteria);
    Ok(tests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, LocalCatalog};
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    struct BrokenCatalog;

    #[async_trait]
    impl Catalog for BrokenCatalog {
        async fn find(&self, _: &SelectionCriteria) -> Result<Vec<TestDescriptor>, CatalogError> {
            Err(CatalogError::Query("503 Service Unavailable".into()))
        }
    }

    fn catalog() -> LocalCatalog {
        LocalCatalog::from_descriptors([
            TestDescriptor::new("login").with_group("smoke").with_tag("fast"),
            TestDescriptor::new("checkout").with_group("smoke"),
            TestDescriptor::new("report").with_group("nightly"),
        ])
    }

    #[tokio::test]
    async fn test_requires_criteria() {
        let err = assert_err!(resolve(&catalog(), &SelectionCriteria::new()).await);
        assert!(matches!(err, CoordinatorError::InvalidSelection));
    }

    #[tokio::test]
    async fn test_preserves_catalog_order() {
        let tests = assert_ok!(resolve(&catalog(), &SelectionCriteria::new().group("smoke")).await);
        let ids: Vec<_> = tests.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["login", "checkout"]);
    }

    #[tokio::test]
    async fn test_empty_result_is_no_match() {
        let err = assert_err!(resolve(&catalog(), &SelectionCriteria::new().tag("missing")).await);
        assert!(matches!(err, CoordinatorError::NoMatch(_)));
        assert!(err.to_string().starts_with("no tests found"));
    }

    #[tokio::test]
    async fn test_catalog_failure() {
        let err = assert_err!(resolve(&BrokenCatalog, &SelectionCriteria::new().id("x")).await);
        assert_eq!(err.to_string(), "catalog query failed: 503 Service Unavailable");
    }
}
