//! Batch orchestration for hrdocs.
//!
//! This crate ties the file stores, text extraction, metadata extraction,
//! record building and packaging into one parameterized run
//! ([`Pipeline::run`]) plus the offline [`rebuild_bulk_file`] workflow.

pub mod pipeline;

pub use pipeline::{
    FallbackEntry, Pipeline, ProgressReporter, RunReport, SilentProgress, extract_document,
    rebuild_bulk_file,
};
