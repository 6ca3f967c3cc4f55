//! Text → [`DocumentMetadata`], with timeout, retry and fallback.

use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use hrdocs_shared::{
    AppConfig, ClassificationConfig, DateToRule, DocumentMetadata, DocumentType, HrDocsError,
    MappingConfig, Result, SOURCE_SYSTEM_OWNER, SourceSystemIdRule, archived_name,
};

use crate::classifier::Classifier;
use crate::prompt::build_prompt;
use crate::schema::{ExtractedFields, parse_extraction};

/// Date layouts recognized in model answers, tried in order.
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Whether a document was classified or fell back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionStatus {
    Classified,
    Unclassified { reason: String },
}

/// Metadata for one document plus how it was obtained.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub metadata: DocumentMetadata,
    pub status: ExtractionStatus,
}

impl ExtractionOutcome {
    pub fn is_classified(&self) -> bool {
        self.status == ExtractionStatus::Classified
    }

    /// The all-empty record for `filename`, keeping the failure reason.
    pub fn fallback(filename: &str, reason: impl Into<String>) -> Self {
        Self {
            metadata: DocumentMetadata::unclassified(filename),
            status: ExtractionStatus::Unclassified {
                reason: reason.into(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Timeout and backoff settings for classifier calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Limit for a single attempt.
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&ClassificationConfig> for RetryPolicy {
    fn from(config: &ClassificationConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// MetadataExtractor
// ---------------------------------------------------------------------------

/// Drives a [`Classifier`] to produce validated document metadata.
#[derive(Debug)]
pub struct MetadataExtractor<C> {
    classifier: C,
    labels: Vec<DocumentType>,
    policy: RetryPolicy,
    mapping: MappingConfig,
    max_input_chars: usize,
}

impl<C: Classifier> MetadataExtractor<C> {
    pub fn new(
        classifier: C,
        labels: Vec<DocumentType>,
        policy: RetryPolicy,
        mapping: MappingConfig,
        max_input_chars: usize,
    ) -> Self {
        Self {
            classifier,
            labels,
            policy,
            mapping,
            max_input_chars,
        }
    }

    /// Build from the `[classification]`, `[document_types]` and `[mapping]`
    /// sections.
    pub fn from_config(classifier: C, config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            classifier,
            config.document_types()?,
            RetryPolicy::from(&config.classification),
            config.mapping.clone(),
            config.classification.max_input_chars,
        ))
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Extract metadata for one document. Never fails: any error yields the
    /// unclassified record with the reason attached.
    #[instrument(skip_all, fields(filename = %filename))]
    pub async fn extract(&self, filename: &str, text: &str) -> ExtractionOutcome {
        if text.trim().is_empty() {
            warn!("document has no text; falling back to unclassified record");
            return ExtractionOutcome::fallback(filename, "document has no text");
        }

        match self.try_extract(filename, text).await {
            Ok(metadata) => {
                debug!(
                    document_type = metadata.document_type_label(),
                    "document classified"
                );
                ExtractionOutcome {
                    metadata,
                    status: ExtractionStatus::Classified,
                }
            }
            Err(e) => {
                warn!(error = %e, "extraction failed; falling back to unclassified record");
                ExtractionOutcome::fallback(filename, e.to_string())
            }
        }
    }

    /// Same as [`extract`](Self::extract) but surfaces the error.
    pub async fn try_extract(&self, filename: &str, text: &str) -> Result<DocumentMetadata> {
        let prompt = build_prompt(text, &self.labels, self.max_input_chars);
        let raw = self.generate_with_retry(&prompt).await?;
        let fields = parse_extraction(&raw)?;
        Ok(self.map_fields(filename, fields))
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = tokio::time::timeout(self.policy.timeout, self.classifier.generate(prompt))
                .await
                .unwrap_or_else(|_| Err(HrDocsError::timeout("classification", self.policy.timeout)));

            let err = match result {
                Ok(raw) => {
                    if attempt > 1 {
                        info!(attempt, "classification succeeded after retry");
                    }
                    return Ok(raw);
                }
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= max_attempts {
                return Err(err);
            }

            let delay = self.policy.backoff_after(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                model = self.classifier.model(),
                error = %err,
                "transient classification failure; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Like [`DocumentType::classify`], but labels outside the configured
    /// list also become `Nessun cluster`.
    fn classify_label(&self, label: &str) -> Option<DocumentType> {
        match DocumentType::classify(label)? {
            kind if kind == DocumentType::NessunCluster || self.labels.contains(&kind) => Some(kind),
            kind => {
                debug!(label = kind.label(), "label not configured; using Nessun cluster");
                Some(DocumentType::NessunCluster)
            }
        }
    }

    fn map_fields(&self, filename: &str, fields: ExtractedFields) -> DocumentMetadata {
        let date_to = match self.mapping.date_to {
            DateToRule::Empty => String::new(),
            DateToRule::Extracted => normalize_date(fields.date_to.as_deref().unwrap_or_default()),
        };
        let source_system_id = match self.mapping.source_system_id {
            SourceSystemIdRule::DocumentCode => fields.document_code.clone(),
            SourceSystemIdRule::Filename => archived_name(filename).to_string(),
        };

        DocumentMetadata {
            filename: filename.to_string(),
            person_number: fields.person_number,
            document_type: self.classify_label(&fields.document_type),
            country: fields.country,
            document_code: fields.document_code,
            document_name: fields.document_name,
            date_from: normalize_date(&fields.date_from),
            date_to,
            source_system_owner: SOURCE_SYSTEM_OWNER.to_string(),
            source_system_id,
        }
    }
}

/// Rewrite a recognized date as `YYYY-MM-DD`; anything else is returned
/// trimmed but otherwise unchanged.
pub fn normalize_date(value: &str) -> String {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ANSWER: &str = r#"{"person_number":"123","document_type":"Formazione","country":"IT",
        "document_code":"C1","document_name":"N1","date_from":"12/05/2023","date_to":"2024-01-31"}"#;

    /// Replays scripted answers, one per call.
    struct Scripted {
        answers: Mutex<VecDeque<Result<String>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(answers: Vec<Result<String>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Classifier for Scripted {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.answers.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(HrDocsError::Extraction("script exhausted".into())))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    /// Never answers.
    struct Hanging;

    impl Classifier for Hanging {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ANSWER.to_string())
        }

        fn model(&self) -> &str {
            "hanging"
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn extractor<C: Classifier>(classifier: C, max_attempts: u32) -> MetadataExtractor<C> {
        MetadataExtractor::new(
            classifier,
            DocumentType::ALL.to_vec(),
            fast_policy(max_attempts),
            MappingConfig::default(),
            10_000,
        )
    }

    fn upstream(status: u16) -> HrDocsError {
        HrDocsError::Upstream {
            status,
            message: "test".into(),
        }
    }

    #[tokio::test]
    async fn classified_document_maps_fields() {
        let ex = extractor(Scripted::new(vec![Ok(ANSWER.into())]), 3);
        let outcome = ex.extract("in/doc1.txt", "Documento n. 12345").await;

        assert!(outcome.is_classified());
        let m = outcome.metadata;
        assert_eq!(m.filename, "in/doc1.txt");
        assert_eq!(m.person_number, "123");
        assert_eq!(m.document_type, Some(DocumentType::Formazione));
        assert_eq!(m.date_from, "2023-05-12");
        assert_eq!(m.date_to, "");
        assert_eq!(m.source_system_owner, "PEOPLE");
        assert_eq!(m.source_system_id, "C1");
    }

    #[tokio::test]
    async fn mapping_rules_are_applied() {
        let mapping = MappingConfig {
            date_to: DateToRule::Extracted,
            source_system_id: SourceSystemIdRule::Filename,
            ..MappingConfig::default()
        };
        let ex = MetadataExtractor::new(
            Scripted::new(vec![Ok(ANSWER.into())]),
            DocumentType::ALL.to_vec(),
            fast_policy(1),
            mapping,
            10_000,
        );
        let m = ex.try_extract("in/doc1.txt", "text").await.unwrap();
        assert_eq!(m.date_to, "2024-01-31");
        assert_eq!(m.source_system_id, "doc1.txt");
    }

    #[tokio::test]
    async fn unknown_label_becomes_nessun_cluster() {
        let answer = ANSWER.replace("Formazione", "Contratto");
        let ex = extractor(Scripted::new(vec![Ok(answer)]), 1);
        let m = ex.try_extract("doc.txt", "text").await.unwrap();
        assert_eq!(m.document_type, Some(DocumentType::NessunCluster));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let ex = extractor(
            Scripted::new(vec![
                Err(upstream(503)),
                Err(HrDocsError::Network("reset".into())),
                Ok(ANSWER.into()),
            ]),
            3,
        );
        let outcome = ex.extract("doc.txt", "text").await;
        assert!(outcome.is_classified());
        assert_eq!(ex.classifier().calls(), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let ex = extractor(
            Scripted::new(vec![
                Err(upstream(429)),
                Err(upstream(429)),
                Err(upstream(429)),
                Ok(ANSWER.into()),
            ]),
            3,
        );
        let outcome = ex.extract("doc.txt", "text").await;
        assert!(!outcome.is_classified());
        assert_eq!(ex.classifier().calls(), 3);
        assert!(outcome.metadata.is_unclassified());
        assert_eq!(outcome.metadata.source_system_owner, "PEOPLE");
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let ex = extractor(Scripted::new(vec![Err(upstream(400)), Ok(ANSWER.into())]), 3);
        let outcome = ex.extract("doc.txt", "text").await;
        assert!(!outcome.is_classified());
        assert_eq!(ex.classifier().calls(), 1);
    }

    #[tokio::test]
    async fn schema_violation_is_not_retried() {
        let ex = extractor(
            Scripted::new(vec![Ok(r#"{"person_number": 5}"#.into()), Ok(ANSWER.into())]),
            3,
        );
        let outcome = ex.extract("doc.txt", "text").await;
        assert_eq!(ex.classifier().calls(), 1);
        match outcome.status {
            ExtractionStatus::Unclassified { reason } => assert!(reason.contains("schema")),
            ExtractionStatus::Classified => panic!("expected fallback"),
        }
    }

    #[tokio::test]
    async fn hung_classifier_times_out_and_falls_back() {
        let ex = extractor(Hanging, 2);
        let started = std::time::Instant::now();
        let outcome = ex.extract("scan.pdf", "text").await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.metadata.is_unclassified());
        match outcome.status {
            ExtractionStatus::Unclassified { reason } => {
                assert!(reason.contains("timed out after"));
                assert!(reason.contains("after 200ms"), "{reason}");
            }
            ExtractionStatus::Classified => panic!("expected fallback"),
        }
    }

    #[tokio::test]
    async fn unconfigured_label_becomes_nessun_cluster() {
        let ex = MetadataExtractor::new(
            Scripted::new(vec![Ok(ANSWER.into()), Ok(ANSWER.into())]),
            vec![DocumentType::FlessibilitaOrarie],
            fast_policy(1),
            MappingConfig::default(),
            10_000,
        );
        let outcome = ex.extract("doc.txt", "text").await;
        assert!(outcome.is_classified());
        assert_eq!(outcome.metadata.document_type, Some(DocumentType::NessunCluster));
        assert_eq!(outcome.metadata.person_number, "123");

        let outcome = extractor(Scripted::new(vec![Ok(ANSWER.into())]), 1)
            .extract("doc.txt", "text")
            .await;
        assert_eq!(outcome.metadata.document_type, Some(DocumentType::Formazione));
    }

    #[tokio::test]
    async fn empty_text_skips_the_classifier() {
        let ex = extractor(Scripted::new(vec![Ok(ANSWER.into())]), 3);
        let outcome = ex.extract("blank.txt", "  \n ").await;
        assert!(!outcome.is_classified());
        assert_eq!(ex.classifier().calls(), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(1_500),
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(1_500));
        assert_eq!(policy.backoff_after(40), Duration::from_millis(1_500));
    }

    #[test]
    fn dates_are_normalized() {
        assert_eq!(normalize_date("2023-05-12"), "2023-05-12");
        assert_eq!(normalize_date(" 12/05/2023 "), "2023-05-12");
        assert_eq!(normalize_date("12-05-2023"), "2023-05-12");
        assert_eq!(normalize_date("12.05.2023"), "2023-05-12");
        assert_eq!(normalize_date("maggio 2023"), "maggio 2023");
        assert_eq!(normalize_date(""), "");
    }
}
