//! Data models for test coordination
//!
//! Descriptors come from the catalog, events from the run topic, and
//! executions and suites are built up while a run is in flight.

mod descriptor;
mod event;
mod execution;
mod suite;

pub use descriptor::{CatalogEntry, SelectionCriteria, TestDescriptor, TEST_KIND};
pub use event::{LifecycleEvent, LifecycleKind};
pub use execution::{ExecutionHandle, ExecutionStatus};
pub use suite::{CaseSnapshot, CaseStatus, SuiteSnapshot, SuiteState, TestCaseState};
