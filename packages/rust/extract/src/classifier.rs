//! Generative model client.

use std::future::Future;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use hrdocs_shared::{ClassificationConfig, HrDocsError, Result};

use crate::{USER_AGENT, transport_error, truncate_body};

/// Sends a prompt to a generative model and returns the raw text answer.
///
/// Implementations make exactly one request per call. Timeouts and retries
/// belong to the caller.
pub trait Classifier: Send + Sync {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;

    /// Model identifier, for logs.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// GeminiClassifier
// ---------------------------------------------------------------------------

/// `generateContent` client with deterministic, JSON-only generation.
pub struct GeminiClassifier {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_output_tokens: u32,
    timeout_secs: u64,
}

impl std::fmt::Debug for GeminiClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClassifier")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

impl GeminiClassifier {
    pub fn new(config: &ClassificationConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HrDocsError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            max_output_tokens: config.max_output_tokens,
            timeout_secs: config.timeout_secs,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl Classifier for GeminiClassifier {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [TextPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("classification request", self.timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HrDocsError::Upstream {
                status: status.as_u16(),
                message: truncate_body(&text),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| HrDocsError::Extraction(format!("invalid model response: {e}")))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| HrDocsError::Extraction("model returned no candidates".into()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            return Err(HrDocsError::Extraction("model returned an empty answer".into()));
        }

        debug!(answer_chars = text.len(), "model answered");
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
