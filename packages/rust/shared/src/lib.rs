//! Shared types, error model, and configuration for hrdocs.
//!
//! This crate is the foundation depended on by all other hrdocs crates.
//! It provides:
//! - [`HrDocsError`]: the unified error type
//! - Domain types ([`DocumentMetadata`], [`DocumentType`], [`RunId`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClassificationConfig, DateToRule, DocumentTypesConfig, MappingConfig, OcrConfig,
    OutputConfig, SourceSystemIdRule, StorageConfig, classification_api_key, config_dir,
    config_file_path, init_config, load_config, load_config_from, ocr_token,
};
pub use error::{HrDocsError, Result};
pub use types::{
    BLOB_DIR, DocumentMetadata, DocumentType, MANIFEST_FILE, METADATA_FILE, RunId,
    SOURCE_SYSTEM_OWNER, archived_name,
};
