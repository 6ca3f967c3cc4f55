//! Application configuration for hrdocs.
//!
//! User config lives at `~/.hrdocs/hrdocs.toml`.
//! CLI flags and environment variables override config file values, which
//! override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HrDocsError, Result};
use crate::types::{BLOB_DIR, DocumentType, MANIFEST_FILE, METADATA_FILE};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "hrdocs.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".hrdocs";

// ---------------------------------------------------------------------------
// Config structs (matching hrdocs.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Input, output and scratch locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// OCR text-extraction service.
    #[serde(default)]
    pub ocr: OcrConfig,

    /// Generative classification service.
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Document types offered to the classifier.
    #[serde(default)]
    pub document_types: DocumentTypesConfig,

    /// Field mapping rules for the output records.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Bulk file naming.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the input file store.
    #[serde(default = "default_input_dir")]
    pub input_dir: String,

    /// Root of the output file store; packages land under `<run_id>/`.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Scratch directory where packages are staged before upload.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_input_dir() -> String {
    "input_files".into()
}
fn default_output_dir() -> String {
    "output".into()
}
fn default_work_dir() -> String {
    "work".into()
}

/// `[ocr]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Processor endpoint (`.../processors/<id>:process`). When unset,
    /// only plain-text inputs can be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Name of the env var holding the bearer token (never store the token itself).
    #[serde(default = "default_ocr_token_env")]
    pub api_key_env: String,

    /// Per-request timeout.
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_ocr_token_env(),
            timeout_secs: default_ocr_timeout(),
        }
    }
}

fn default_ocr_token_env() -> String {
    "HRDOCS_OCR_TOKEN".into()
}
fn default_ocr_timeout() -> u64 {
    120
}

/// `[classification]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// API base URL.
    #[serde(default = "default_classification_endpoint")]
    pub endpoint: String,

    /// Model id.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-attempt timeout.
    #[serde(default = "default_classification_timeout")]
    pub timeout_secs: u64,

    /// Total attempts for transient failures (1 = no retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff between attempts; doubles each retry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Upper bound for the backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Document text beyond this many characters is cut from the prompt.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classification_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_classification_timeout(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_output_tokens: default_max_output_tokens(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_classification_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_classification_timeout() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8_000
}
fn default_max_output_tokens() -> u32 {
    512
}
fn default_max_input_chars() -> usize {
    12_000
}

/// `[document_types]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTypesConfig {
    /// Labels offered to the classifier; each must belong to the closed set.
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
}

impl Default for DocumentTypesConfig {
    fn default() -> Self {
        Self {
            labels: default_labels(),
        }
    }
}

fn default_labels() -> Vec<String> {
    DocumentType::ALL
        .iter()
        .map(|t| t.label().to_string())
        .collect()
}

/// How `DateTo` is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateToRule {
    /// Always empty.
    #[default]
    Empty,
    /// Use the model's `date_to` value.
    Extracted,
}

/// How `SourceSystemId` is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystemIdRule {
    /// Mirror `document_code`.
    #[default]
    DocumentCode,
    /// Use the archived file name.
    Filename,
}

/// `[mapping]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub date_to: DateToRule,

    #[serde(default)]
    pub source_system_id: SourceSystemIdRule,

    /// Constant written into `DataTypeCode` of attachment records.
    #[serde(default = "default_data_type_code")]
    pub data_type_code: String,

    /// Prefix each record with `MERGE|<Section>|`.
    #[serde(default)]
    pub merge_prefix: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            date_to: DateToRule::default(),
            source_system_id: SourceSystemIdRule::default(),
            data_type_code: default_data_type_code(),
            merge_prefix: false,
        }
    }
}

fn default_data_type_code() -> String {
    "FILE".into()
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// File name of the bulk file at the package root.
    #[serde(default = "default_bulk_file_name")]
    pub bulk_file_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            bulk_file_name: default_bulk_file_name(),
        }
    }
}

fn default_bulk_file_name() -> String {
    "DocumentsOfRecord.dat".into()
}

impl AppConfig {
    /// Resolve the configured labels into the closed set.
    pub fn document_types(&self) -> Result<Vec<DocumentType>> {
        self.document_types
            .labels
            .iter()
            .map(|label| {
                DocumentType::from_label(label).ok_or_else(|| {
                    HrDocsError::config(format!(
                        "unknown document type {label:?} in [document_types]"
                    ))
                })
            })
            .collect()
    }

    /// Check cross-field constraints not expressible in serde.
    pub fn validate(&self) -> Result<()> {
        if self.document_types()?.is_empty() {
            return Err(HrDocsError::config("[document_types] labels must not be empty"));
        }
        if self.classification.max_attempts == 0 {
            return Err(HrDocsError::config(
                "[classification] max_attempts must be at least 1",
            ));
        }
        if self.classification.timeout_secs == 0 {
            return Err(HrDocsError::config(
                "[classification] timeout_secs must be at least 1",
            ));
        }
        let name = &self.output.bulk_file_name;
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(HrDocsError::config(format!(
                "[output] bulk_file_name {name:?} must be a plain file name"
            )));
        }
        if [BLOB_DIR, METADATA_FILE, MANIFEST_FILE]
            .iter()
            .any(|reserved| name.eq_ignore_ascii_case(reserved))
        {
            return Err(HrDocsError::config(format!(
                "[output] bulk_file_name {name:?} is reserved for package contents"
            )));
        }
        if self.mapping.data_type_code.contains(['|', '\n', '\r']) {
            return Err(HrDocsError::config(
                "[mapping] data_type_code must not contain delimiters",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.hrdocs/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| HrDocsError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.hrdocs/hrdocs.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HrDocsError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| HrDocsError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HrDocsError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HrDocsError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HrDocsError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the classification API key from the configured env var.
pub fn classification_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.classification.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(HrDocsError::config(format!(
            "classification API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Read the optional OCR bearer token from the configured env var.
pub fn ocr_token(config: &AppConfig) -> Option<String> {
    std::env::var(&config.ocr.api_key_env)
        .ok()
        .filter(|v| !v.is_empty())
}
