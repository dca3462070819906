//! Output formatting module
//!
//! Batch reports are rendered by [`ResultFormatter`]; live runs are written
//! as newline-delimited JSON frames by [`stream`].

mod formatter;
pub mod stream;

pub use formatter::{write_report_to_file, OutputFormat, ResultFormatter};
