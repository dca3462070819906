//! Run-level errors

use std::io;
use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors that abort a run before or instead of dispatching
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("at least one selection criterion (id, group, namespace or tag) is required")]
    InvalidSelection,

    #[error("catalog query failed: {0}")]
    CatalogQuery(#[from] CatalogError),

    #[error("no tests found matching {0}")]
    NoMatch(String),

    #[error("topic {0} already has a subscriber")]
    TopicInUse(String),

    #[error("failed to write event stream: {0}")]
    Stream(#[from] io::Error),
}

impl CoordinatorError {
    /// The selection itself was the problem, not the infrastructure
    pub fn is_selection_error(&self) -> bool {
        matches!(
            self,
            CoordinatorError::InvalidSelection | CoordinatorError::NoMatch(_)
        )
    }
}
