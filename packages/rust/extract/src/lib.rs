//! Text extraction, classification and metadata extraction.
//!
//! A document flows through three stages here:
//! 1. [`TextExtractor`] turns raw bytes into plain text (UTF-8 decode or OCR).
//! 2. [`Classifier`] sends a prompt to a generative model and returns its raw
//!    JSON answer.
//! 3. [`MetadataExtractor`] drives the classifier with timeout and retry,
//!    validates the answer against the metadata schema, applies the mapping
//!    rules, and falls back to the unclassified record on any failure.

mod classifier;
mod metadata;
mod prompt;
mod schema;
mod text;

pub use classifier::{Classifier, GeminiClassifier};
pub use metadata::{
    ExtractionOutcome, ExtractionStatus, MetadataExtractor, RetryPolicy, normalize_date,
};
pub use prompt::build_prompt;
pub use schema::{ExtractedFields, REQUIRED_KEYS, parse_extraction};
pub use text::{
    OcrTextExtractor, PlainTextExtractor, RoutingTextExtractor, TextExtractor, is_plain_text,
    mime_type_for,
};

/// User-Agent string for outbound HTTP requests.
pub(crate) const USER_AGENT: &str = concat!("hrdocs/", env!("CARGO_PKG_VERSION"));

/// Map a reqwest transport error into the shared error model.
pub(crate) fn transport_error(
    operation: &str,
    timeout_secs: u64,
    err: reqwest::Error,
) -> hrdocs_shared::HrDocsError {
    if err.is_timeout() {
        hrdocs_shared::HrDocsError::timeout(operation, std::time::Duration::from_secs(timeout_secs))
    } else {
        hrdocs_shared::HrDocsError::Network(format!("{operation}: {err}"))
    }
}

/// Keep error bodies short enough for a log line.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
