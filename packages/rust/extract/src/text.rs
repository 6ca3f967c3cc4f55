//! Bytes → plain text.

use std::future::Future;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use hrdocs_shared::{AppConfig, HrDocsError, OcrConfig, Result, ocr_token};

use crate::{USER_AGENT, transport_error, truncate_body};

/// Turns one document's bytes into text.
pub trait TextExtractor: Send + Sync {
    /// `name` is the object key; only its extension is inspected.
    fn extract_text(&self, name: &str, bytes: &[u8])
    -> impl Future<Output = Result<String>> + Send;
}

/// Whether the object is already plain text.
pub fn is_plain_text(name: &str) -> bool {
    extension(name).is_some_and(|ext| ext == "txt")
}

/// MIME type sent to the OCR service, derived from the extension.
pub fn mime_type_for(name: &str) -> Option<&'static str> {
    let mime = match extension(name)?.as_str() {
        "pdf" => "application/pdf",
        "tif" | "tiff" => "image/tiff",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime)
}

fn extension(name: &str) -> Option<String> {
    let base = hrdocs_shared::archived_name(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

/// Decodes `.txt` objects as UTF-8, replacing invalid sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    fn decode(name: &str, bytes: &[u8]) -> Result<String> {
        if !is_plain_text(name) {
            return Err(HrDocsError::Extraction(format!(
                "{name}: not a plain-text document"
            )));
        }
        let text = String::from_utf8_lossy(bytes);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

impl TextExtractor for PlainTextExtractor {
    async fn extract_text(&self, name: &str, bytes: &[u8]) -> Result<String> {
        Self::decode(name, bytes)
    }
}

// ---------------------------------------------------------------------------
// OCR
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    raw_document: RawDocument<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument<'a> {
    content: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct ProcessResponse {
    document: Option<ProcessedDocument>,
}

#[derive(Deserialize)]
struct ProcessedDocument {
    #[serde(default)]
    text: String,
}

/// Sends scans to a document OCR endpoint and returns the recognized text.
///
/// The endpoint receives `{"rawDocument": {"content": <base64>, "mimeType": ..}}`
/// and answers with `{"document": {"text": ..}}`.
pub struct OcrTextExtractor {
    client: Client,
    endpoint: String,
    token: Option<String>,
    timeout_secs: u64,
}

impl std::fmt::Debug for OcrTextExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrTextExtractor")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl OcrTextExtractor {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HrDocsError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
            timeout_secs,
        })
    }

    /// Build from the `[ocr]` section; `None` when no endpoint is configured.
    pub fn from_config(config: &OcrConfig, token: Option<String>) -> Result<Option<Self>> {
        match &config.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => {
                Self::new(endpoint.trim(), token, config.timeout_secs).map(Some)
            }
            _ => Ok(None),
        }
    }

    #[instrument(skip_all, fields(name = %name, size = bytes.len()))]
    async fn process(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let mime_type = mime_type_for(name).ok_or_else(|| {
            HrDocsError::Extraction(format!("{name}: unsupported file type for OCR"))
        })?;

        let body = ProcessRequest {
            raw_document: RawDocument {
                content: BASE64.encode(bytes),
                mime_type,
            },
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("OCR request", self.timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HrDocsError::Upstream {
                status: status.as_u16(),
                message: format!("OCR {name}: {}", truncate_body(&text)),
            });
        }

        let parsed: ProcessResponse = response
            .json()
            .await
            .map_err(|e| HrDocsError::Extraction(format!("{name}: invalid OCR response: {e}")))?;

        let text = parsed.document.map(|d| d.text).unwrap_or_default();
        debug!(chars = text.chars().count(), "OCR finished");
        Ok(text)
    }
}

impl TextExtractor for OcrTextExtractor {
    async fn extract_text(&self, name: &str, bytes: &[u8]) -> Result<String> {
        self.process(name, bytes).await
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Plain text for `.txt`, OCR for everything else.
///
/// Without an OCR endpoint only `.txt` documents yield text; the others fail
/// extraction and fall back to the unclassified record downstream.
#[derive(Debug, Default)]
pub struct RoutingTextExtractor {
    plain: PlainTextExtractor,
    ocr: Option<OcrTextExtractor>,
}

impl RoutingTextExtractor {
    pub fn new(ocr: Option<OcrTextExtractor>) -> Self {
        Self {
            plain: PlainTextExtractor,
            ocr,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let ocr = OcrTextExtractor::from_config(&config.ocr, ocr_token(config))?;
        if ocr.is_none() {
            debug!("no OCR endpoint configured; only .txt documents will be read");
        }
        Ok(Self::new(ocr))
    }

    pub fn has_ocr(&self) -> bool {
        self.ocr.is_some()
    }
}

impl TextExtractor for RoutingTextExtractor {
    async fn extract_text(&self, name: &str, bytes: &[u8]) -> Result<String> {
        if is_plain_text(name) {
            return self.plain.extract_text(name, bytes).await;
        }
        match &self.ocr {
            Some(ocr) => ocr.extract_text(name, bytes).await,
            None => Err(HrDocsError::Extraction(format!(
                "{name}: OCR is not configured"
            ))),
        }
    }
}
