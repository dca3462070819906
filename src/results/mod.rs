//! Run report assembly and persistence

mod report;

pub use report::{assemble, RunReport, RunStatus, TestResultEntry};
